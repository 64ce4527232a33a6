use crate::error::TransportError;
use crate::frame::EventFrame;
use crate::transport::{ConnectOptions, FrameTransport, TransportState};
use catflap_keychain::DeviceIdentity;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Typed facade over [`FrameTransport`]. The named operations are thin
/// request/response wrappers; anything not covered goes through
/// [`GatewayClient::send`].
#[derive(Clone)]
pub struct GatewayClient {
    transport: FrameTransport,
    opts: ConnectOptions,
}

impl GatewayClient {
    pub fn new(opts: ConnectOptions) -> Self {
        Self::from_transport(FrameTransport::new(), opts)
    }

    /// Wrap an existing transport, e.g. one whose lifecycle a supervisor
    /// already drives.
    pub fn from_transport(transport: FrameTransport, opts: ConnectOptions) -> Self {
        Self { transport, opts }
    }

    pub fn transport(&self) -> &FrameTransport {
        &self.transport
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Connect using the configured URL.
    pub async fn connect(&self, identity: &DeviceIdentity) -> Result<Value, TransportError> {
        self.transport.connect(self.opts.clone(), identity).await
    }

    /// Connect to an override URL, e.g. the loopback side of an SSH tunnel.
    pub async fn connect_to(
        &self,
        url: &str,
        identity: &DeviceIdentity,
    ) -> Result<Value, TransportError> {
        let mut opts = self.opts.clone();
        opts.url = url.to_string();
        self.transport.connect(opts, identity).await
    }

    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        self.transport.send(method, params).await
    }

    pub fn take_events(&self) -> Option<mpsc::Receiver<EventFrame>> {
        self.transport.take_events()
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    pub async fn health(&self) -> Result<Value, TransportError> {
        self.send("health", None).await
    }

    pub async fn list_agents(&self) -> Result<Value, TransportError> {
        self.send("agents.list", None).await
    }

    pub async fn list_sessions(&self) -> Result<Value, TransportError> {
        self.send("sessions.list", None).await
    }

    pub async fn send_chat(
        &self,
        session_key: &str,
        message: &str,
    ) -> Result<Value, TransportError> {
        self.send(
            "chat.send",
            Some(json!({ "sessionKey": session_key, "message": message })),
        )
        .await
    }

    pub async fn fetch_history(&self, session_key: &str) -> Result<Value, TransportError> {
        self.send("chat.history", Some(json!({ "sessionKey": session_key })))
            .await
    }
}
