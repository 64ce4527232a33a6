use crate::error::{classify_ws_error, ConnectKind, TransportError};
use crate::frame::{
    ClientInfo, ConnectAuth, ConnectParams, EventFrame, Frame, RequestFrame,
    CONNECT_CHALLENGE_EVENT,
};
use crate::url::normalize_gateway_url;
use catflap_keychain::{DeviceAuthParams, DeviceIdentity};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingSender = oneshot::Sender<Result<Value, TransportError>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Everything needed for the connect handshake besides the device identity.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub url: String,
    pub token: String,
    pub client_id: String,
    pub client_mode: String,
    pub display_name: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub connect_timeout_ms: u64,
}

/// One WebSocket connection to the gateway: serializes requests, matches
/// responses to requests by id, fans unsolicited events out to the
/// subscriber, and runs the challenge/response handshake at connect time.
///
/// All mutable state (the pending map, the event sender, the challenge
/// rendezvous) is owned by this struct and touched only from the send path
/// and the receive loop.
#[derive(Clone)]
pub struct FrameTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    state: SyncMutex<TransportState>,
    url: SyncMutex<Option<String>>,
    pending: SyncMutex<HashMap<String, PendingSender>>,
    sink: Mutex<Option<WsSink>>,
    events_tx: SyncMutex<Option<mpsc::Sender<EventFrame>>>,
    events_rx: SyncMutex<Option<mpsc::Receiver<EventFrame>>>,
    challenge_tx: SyncMutex<Option<oneshot::Sender<String>>>,
    recv_task: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for FrameTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                state: SyncMutex::new(TransportState::Disconnected),
                url: SyncMutex::new(None),
                pending: SyncMutex::new(HashMap::new()),
                sink: Mutex::new(None),
                events_tx: SyncMutex::new(None),
                events_rx: SyncMutex::new(None),
                challenge_tx: SyncMutex::new(None),
                recv_task: SyncMutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> TransportState {
        self.inner.state.lock().clone()
    }

    /// Take the event stream for this connection. Single consumer; the
    /// channel closes when the connection ends.
    pub fn take_events(&self) -> Option<mpsc::Receiver<EventFrame>> {
        self.inner.events_rx.lock().take()
    }

    /// Open the socket, wait for the server's `connect.challenge`, then
    /// authenticate with a signed device payload bound to the challenge
    /// nonce. Returns the hello payload from the connect response.
    pub async fn connect(
        &self,
        opts: ConnectOptions,
        identity: &DeviceIdentity,
    ) -> Result<Value, TransportError> {
        self.disconnect().await;
        *self.inner.state.lock() = TransportState::Connecting;
        match self.handshake(&opts, identity).await {
            Ok(payload) => {
                *self.inner.state.lock() = TransportState::Connected;
                Ok(payload)
            }
            Err(err) => {
                // do not leave a half-open socket behind a failed handshake
                self.teardown_socket().await;
                *self.inner.state.lock() = TransportState::Error(err.to_string());
                Err(err)
            }
        }
    }

    async fn handshake(
        &self,
        opts: &ConnectOptions,
        identity: &DeviceIdentity,
    ) -> Result<Value, TransportError> {
        let url = normalize_gateway_url(&opts.url)?;
        *self.inner.url.lock() = Some(url.clone());
        let timeout = Duration::from_millis(opts.connect_timeout_ms);

        let (socket, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Connection {
                url: url.clone(),
                kind: ConnectKind::Timeout,
                detail: "websocket connect timed out".to_string(),
            })?
            .map_err(|err| {
                let (kind, detail) = classify_ws_error(&err);
                TransportError::Connection {
                    url: url.clone(),
                    kind,
                    detail,
                }
            })?;
        debug!(%url, "websocket open, waiting for challenge");

        let (sink, stream) = socket.split();
        *self.inner.sink.lock().await = Some(sink);
        let (events_tx, events_rx) = mpsc::channel(256);
        *self.inner.events_tx.lock() = Some(events_tx);
        *self.inner.events_rx.lock() = Some(events_rx);
        let (challenge_tx, challenge_rx) = oneshot::channel();
        *self.inner.challenge_tx.lock() = Some(challenge_tx);

        let task = tokio::spawn(receive_loop(self.inner.clone(), stream));
        *self.inner.recv_task.lock() = Some(task);

        // the server must move first; our signature binds to its nonce
        let nonce = tokio::time::timeout(timeout, challenge_rx)
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(
                    "timed out waiting for connect challenge".to_string(),
                )
            })?
            .map_err(|_| {
                TransportError::ConnectionFailed(
                    "connection closed before the connect challenge arrived".to_string(),
                )
            })?;

        let signed_at = chrono::Utc::now().timestamp_millis() as u64;
        let device = identity
            .sign_device_auth(&DeviceAuthParams {
                client_id: opts.client_id.clone(),
                client_mode: opts.client_mode.clone(),
                role: opts.role.clone(),
                scopes: opts.scopes.clone(),
                token: opts.token.clone(),
                nonce: Some(nonce),
                signed_at,
            })
            .map_err(|err| {
                TransportError::ConnectionFailed(format!("device auth signing failed: {}", err))
            })?;

        let params = ConnectParams {
            min_protocol: opts.min_protocol,
            max_protocol: opts.max_protocol,
            client: ClientInfo {
                id: opts.client_id.clone(),
                display_name: opts.display_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                platform: std::env::consts::OS.to_string(),
                mode: opts.client_mode.clone(),
            },
            role: opts.role.clone(),
            scopes: opts.scopes.clone(),
            auth: ConnectAuth {
                token: opts.token.clone(),
            },
            device,
        };
        let params = serde_json::to_value(&params)
            .map_err(|err| TransportError::ConnectionFailed(err.to_string()))?;

        let payload = self.send("connect", Some(params)).await?;
        info!(%url, "gateway session established");
        Ok(payload)
    }

    /// Send a request and await its response. Requires a live socket;
    /// `Connecting` is allowed so the bootstrap `connect` call can use the
    /// same path as everything else.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        {
            let state = self.inner.state.lock();
            if !matches!(*state, TransportState::Connected | TransportState::Connecting) {
                return Err(TransportError::NotConnected);
            }
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);

        let frame = Frame::Request(RequestFrame {
            id: id.clone(),
            method: method.to_string(),
            params,
        });
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                self.inner.pending.lock().remove(&id);
                return Err(TransportError::ConnectionFailed(err.to_string()));
            }
        };

        {
            let mut sink = self.inner.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                self.inner.pending.lock().remove(&id);
                return Err(TransportError::NotConnected);
            };
            if let Err(err) = sink.send(Message::Text(text)).await {
                self.inner.pending.lock().remove(&id);
                let (kind, detail) = classify_ws_error(&err);
                return Err(self.connection_error(kind, detail));
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::NotConnected),
        }
    }

    /// Idempotent teardown: stops the receive loop, closes the socket,
    /// fails every outstanding waiter, closes the event stream.
    pub async fn disconnect(&self) {
        self.teardown_socket().await;
        *self.inner.state.lock() = TransportState::Disconnected;
    }

    async fn teardown_socket(&self) {
        if let Some(task) = self.inner.recv_task.lock().take() {
            task.abort();
        }
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        self.inner.challenge_tx.lock().take();
        fail_all_pending(&self.inner, || TransportError::NotConnected);
        *self.inner.events_tx.lock() = None;
        self.inner.events_rx.lock().take();
    }

    fn connection_error(&self, kind: ConnectKind, detail: String) -> TransportError {
        let url = self
            .inner
            .url
            .lock()
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string());
        TransportError::Connection { url, kind, detail }
    }
}

fn fail_all_pending(inner: &TransportInner, make_err: impl Fn() -> TransportError) {
    let waiters: Vec<(String, PendingSender)> = inner.pending.lock().drain().collect();
    for (id, tx) in waiters {
        debug!(%id, "failing pending request");
        let _ = tx.send(Err(make_err()));
    }
}

async fn receive_loop(inner: Arc<TransportInner>, mut stream: WsStream) {
    let (reason, kind) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => dispatch_frame(&inner, text.as_bytes()).await,
            Some(Ok(Message::Binary(data))) => dispatch_frame(&inner, &data).await,
            Some(Ok(Message::Close(_))) => {
                break ("connection closed by server".to_string(), None);
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                let (kind, detail) = classify_ws_error(&err);
                break (detail, Some(kind));
            }
            None => break ("connection closed".to_string(), None),
        }
    };
    connection_lost(&inner, reason, kind).await;
}

async fn connection_lost(inner: &Arc<TransportInner>, reason: String, kind: Option<ConnectKind>) {
    warn!(%reason, "gateway connection lost");
    let url = inner
        .url
        .lock()
        .clone()
        .unwrap_or_else(|| "<unknown>".to_string());
    fail_all_pending(inner, || match kind {
        Some(kind) => TransportError::Connection {
            url: url.clone(),
            kind,
            detail: reason.clone(),
        },
        None => TransportError::Disconnected(reason.clone()),
    });
    // dropping the challenge sender fails a handshake still waiting on it
    inner.challenge_tx.lock().take();
    // dropping the sender closes the event stream for the subscriber
    *inner.events_tx.lock() = None;
    *inner.sink.lock().await = None;

    let mut state = inner.state.lock();
    let next = match &*state {
        TransportState::Connected | TransportState::Connecting => TransportState::Error(reason),
        _ => TransportState::Disconnected,
    };
    *state = next;
}

async fn dispatch_frame(inner: &Arc<TransportInner>, raw: &[u8]) {
    let frame: Frame = match serde_json::from_slice(raw) {
        Ok(frame) => frame,
        Err(err) => {
            // tolerate unknown or malformed frames; the connection survives
            debug!(error = %err, "dropping undecodable frame");
            return;
        }
    };
    match frame {
        Frame::Response(res) => {
            let waiter = inner.pending.lock().remove(&res.id);
            match waiter {
                Some(tx) => {
                    let outcome = if res.ok {
                        Ok(res.payload.unwrap_or(Value::Null))
                    } else {
                        let error = res.error.unwrap_or_default();
                        Err(TransportError::Server {
                            code: error.code,
                            message: error
                                .message
                                .unwrap_or_else(|| "request failed".to_string()),
                        })
                    };
                    let _ = tx.send(outcome);
                }
                None => debug!(id = %res.id, "response for unknown request id, dropping"),
            }
        }
        Frame::Event(event) => {
            if event.event == CONNECT_CHALLENGE_EVENT {
                let nonce = event
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("nonce"))
                    .and_then(|n| n.as_str())
                    .map(str::to_string);
                let tx = inner.challenge_tx.lock().take();
                match (tx, nonce) {
                    (Some(tx), Some(nonce)) => {
                        let _ = tx.send(nonce);
                    }
                    (Some(_), None) => warn!("connect.challenge without a nonce, ignoring"),
                    _ => debug!("unexpected connect.challenge, ignoring"),
                }
                return;
            }
            let tx = inner.events_tx.lock().clone();
            if let Some(tx) = tx {
                if tx.send(event).await.is_err() {
                    debug!("event subscriber gone, dropping event");
                }
            }
        }
        Frame::Request(req) => {
            debug!(method = %req.method, "ignoring inbound request frame");
        }
    }
}
