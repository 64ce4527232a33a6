use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::relay::run_relay;
use catflap_keychain::{HostKeyTrustStore, TrustCheck};
use parking_lot::Mutex as SyncMutex;
use russh::client::{self, Config as ClientConfig, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::Disconnect;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Connected { local_port: u16 },
    Error(String),
}

/// SSH tunnel to the gateway host: authenticates with the device key,
/// validates the host key trust-on-first-use, and relays local TCP
/// connections to a fixed port on the remote side. One session at a time;
/// reconnecting tears the previous session down first.
#[derive(Clone)]
pub struct SshTunnel {
    trust: Arc<SyncMutex<HostKeyTrustStore>>,
    state: Arc<SyncMutex<TunnelState>>,
    inner: Arc<Mutex<Option<ActiveTunnel>>>,
}

struct ActiveTunnel {
    handle: Arc<Mutex<Handle<TunnelHandler>>>,
    local_port: u16,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SshTunnel {
    pub fn new(trust: Arc<SyncMutex<HostKeyTrustStore>>) -> Self {
        Self {
            trust,
            state: Arc::new(SyncMutex::new(TunnelState::Disconnected)),
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state.lock().clone()
    }

    pub async fn local_port(&self) -> Option<u16> {
        self.inner.lock().await.as_ref().map(|a| a.local_port)
    }

    /// Establish the tunnel and return the bound local port.
    pub async fn connect(&self, cfg: TunnelConfig) -> Result<u16, TunnelError> {
        self.disconnect().await;
        *self.state.lock() = TunnelState::Connecting;
        match self.establish(cfg).await {
            Ok(local_port) => {
                *self.state.lock() = TunnelState::Connected { local_port };
                Ok(local_port)
            }
            Err(err) => {
                *self.state.lock() = TunnelState::Error(err.to_string());
                Err(err)
            }
        }
    }

    async fn establish(&self, cfg: TunnelConfig) -> Result<u16, TunnelError> {
        let client_config = Arc::new(ClientConfig {
            keepalive_interval: Some(Duration::from_secs(cfg.keepalive_interval_secs)),
            keepalive_max: 3,
            ..Default::default()
        });
        let handler = TunnelHandler {
            host: cfg.host.clone(),
            trust: self.trust.clone(),
        };

        let timeout = Duration::from_millis(cfg.connect_timeout_ms);
        let sock = tokio::time::timeout(timeout, TcpStream::connect((cfg.host.as_str(), cfg.port)))
            .await
            .map_err(|_| TunnelError::Timeout)?
            .map_err(|e| TunnelError::Connect(e.to_string()))?;

        let mut handle =
            tokio::time::timeout(timeout, client::connect_stream(client_config, sock, handler))
                .await
                .map_err(|_| TunnelError::Timeout)??;

        let auth = handle
            .authenticate_publickey(
                cfg.username.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(cfg.private_key.clone()), None),
            )
            .await
            .map_err(TunnelError::from)?;
        if !matches!(auth, client::AuthResult::Success) {
            return Err(TunnelError::Auth);
        }
        info!(host = %cfg.host, port = cfg.port, user = %cfg.username, "ssh tunnel connected");

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let local_port = listener.local_addr()?.port();
        let cancel = CancellationToken::new();
        let handle = Arc::new(Mutex::new(handle));

        let accept_task = spawn_accept_loop(
            listener,
            handle.clone(),
            cfg.remote_host.clone(),
            cfg.remote_port,
            cancel.clone(),
        );
        let monitor_task = spawn_liveness_monitor(handle.clone(), self.state.clone(), cancel.clone());

        *self.inner.lock().await = Some(ActiveTunnel {
            handle,
            local_port,
            cancel,
            tasks: vec![accept_task, monitor_task],
        });
        debug!(local_port, "tunnel listener bound");
        Ok(local_port)
    }

    /// Close the listener, all relays, and the SSH session. No-op when
    /// already disconnected.
    pub async fn disconnect(&self) {
        let active = self.inner.lock().await.take();
        if let Some(active) = active {
            active.cancel.cancel();
            {
                let guard = active.handle.lock().await;
                let _ = guard
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await;
            }
            for task in active.tasks {
                let _ = task.await;
            }
        }
        *self.state.lock() = TunnelState::Disconnected;
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    handle: Arc<Mutex<Handle<TunnelHandler>>>,
    remote_host: String,
    remote_port: u16,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (sock, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "tunnel listener error");
                        break;
                    }
                },
            };
            debug!(%peer, "accepted local connection");
            let handle = handle.clone();
            let remote_host = remote_host.clone();
            let relay_cancel = cancel.child_token();
            tokio::spawn(async move {
                let open = async move {
                    let guard = handle.lock().await;
                    let channel = guard
                        .channel_open_direct_tcpip(
                            &remote_host,
                            remote_port as u32,
                            "127.0.0.1",
                            peer.port() as u32,
                        )
                        .await
                        .map_err(|e| {
                            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
                        })?;
                    Ok(channel.into_stream())
                };
                if let Err(err) = run_relay(sock, open, relay_cancel).await {
                    debug!(error = %err, "relay closed with error");
                }
            });
        }
    })
}

fn spawn_liveness_monitor(
    handle: Arc<Mutex<Handle<TunnelHandler>>>,
    state: Arc<SyncMutex<TunnelState>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
            if handle.lock().await.is_closed() {
                warn!("ssh connection lost, tearing down relays");
                *state.lock() = TunnelState::Error("ssh connection lost".to_string());
                cancel.cancel();
                return;
            }
        }
    })
}

#[derive(Clone)]
struct TunnelHandler {
    host: String,
    trust: Arc<SyncMutex<HostKeyTrustStore>>,
}

impl client::Handler for TunnelHandler {
    type Error = TunnelError;

    fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let host = self.host.clone();
        let trust = self.trust.clone();
        let fingerprint = fingerprint_hex(server_public_key);
        async move {
            let fingerprint = fingerprint?;
            let mut store = trust.lock();
            match store.check(&host, &fingerprint) {
                TrustCheck::Match => Ok(true),
                TrustCheck::Unknown => {
                    store.save(&host, &fingerprint)?;
                    info!(%host, %fingerprint, "pinned host key on first use");
                    Ok(true)
                }
                TrustCheck::Mismatch => Err(TunnelError::HostKeyMismatch(host)),
            }
        }
    }
}

fn fingerprint_hex(key: &russh::keys::PublicKey) -> Result<String, TunnelError> {
    let wire = key
        .to_bytes()
        .map_err(|e| TunnelError::Ssh(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&wire)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<SyncMutex<HostKeyTrustStore>> {
        Arc::new(SyncMutex::new(
            HostKeyTrustStore::load(dir.path().join("hosts.json")).unwrap(),
        ))
    }

    #[tokio::test]
    async fn disconnect_without_session_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let tunnel = SshTunnel::new(store(&dir));
        tunnel.disconnect().await;
        tunnel.disconnect().await;
        assert_eq!(tunnel.state(), TunnelState::Disconnected);
        assert!(tunnel.local_port().await.is_none());
    }

    #[tokio::test]
    async fn connect_to_closed_port_reports_connect_error() {
        let dir = TempDir::new().unwrap();
        let tunnel = SshTunnel::new(store(&dir));
        // bind then drop to get a port nothing listens on
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let cfg = TunnelConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "nobody".to_string(),
            private_key: catflap_keychain::DeviceIdentity::generate()
                .unwrap()
                .private_key()
                .clone(),
            remote_host: "localhost".to_string(),
            remote_port: 18789,
            connect_timeout_ms: 2000,
            keepalive_interval_secs: 15,
        };
        let err = tunnel.connect(cfg).await.unwrap_err();
        assert!(matches!(err, TunnelError::Connect(_) | TunnelError::Timeout));
        assert!(matches!(tunnel.state(), TunnelState::Error(_)));
        assert!(!err.is_fatal());
    }
}
