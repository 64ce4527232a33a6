use crate::supervisor::LinkStatus;
use serde_json::Value;

#[derive(Clone, Debug)]
pub enum Event {
    LinkStateChanged {
        status: LinkStatus,
    },
    /// Gateway event forwarded verbatim (chat deltas, health, shutdown).
    Gateway {
        event: String,
        payload: Option<Value>,
        seq: Option<u64>,
    },
    /// A reconnect restored the session; consumers should reload their
    /// agent/session/config lists.
    SessionRestored,
    Notification {
        level: String,
        message: String,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn send(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}
