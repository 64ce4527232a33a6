//! Seams between the supervisor and the transport layers. The supervisor
//! owns its tunnel and gateway through these traits so tests can inject
//! fakes.

use async_trait::async_trait;
use catflap_keychain::DeviceIdentity;
use catflap_ssh::{SshTunnel, TunnelConfig, TunnelError};
use catflap_transport::{ConnectOptions, EventFrame, FrameTransport, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub remote_host: String,
    pub remote_port: u16,
}

#[async_trait]
pub trait TunnelLink: Send + Sync {
    /// Open the tunnel and return the local loopback port it listens on.
    async fn open(
        &self,
        target: &TunnelTarget,
        identity: &DeviceIdentity,
    ) -> Result<u16, TunnelError>;
    async fn close(&self);
}

#[async_trait]
pub trait GatewayLink: Send + Sync {
    async fn connect(
        &self,
        opts: &ConnectOptions,
        identity: &DeviceIdentity,
    ) -> Result<Value, TransportError>;
    async fn disconnect(&self);
    async fn health(&self) -> Result<Value, TransportError>;
    fn take_events(&self) -> Option<mpsc::Receiver<EventFrame>>;
}

/// [`SshTunnel`] adapter carrying the timeouts the target struct omits.
pub struct SshTunnelLink {
    tunnel: SshTunnel,
    connect_timeout_ms: u64,
    keepalive_interval_secs: u64,
}

impl SshTunnelLink {
    pub fn new(tunnel: SshTunnel, connect_timeout_ms: u64, keepalive_interval_secs: u64) -> Self {
        Self {
            tunnel,
            connect_timeout_ms,
            keepalive_interval_secs,
        }
    }
}

#[async_trait]
impl TunnelLink for SshTunnelLink {
    async fn open(
        &self,
        target: &TunnelTarget,
        identity: &DeviceIdentity,
    ) -> Result<u16, TunnelError> {
        self.tunnel
            .connect(TunnelConfig {
                host: target.host.clone(),
                port: target.port,
                username: target.username.clone(),
                private_key: identity.private_key().clone(),
                remote_host: target.remote_host.clone(),
                remote_port: target.remote_port,
                connect_timeout_ms: self.connect_timeout_ms,
                keepalive_interval_secs: self.keepalive_interval_secs,
            })
            .await
    }

    async fn close(&self) {
        self.tunnel.disconnect().await;
    }
}

#[async_trait]
impl GatewayLink for FrameTransport {
    async fn connect(
        &self,
        opts: &ConnectOptions,
        identity: &DeviceIdentity,
    ) -> Result<Value, TransportError> {
        FrameTransport::connect(self, opts.clone(), identity).await
    }

    async fn disconnect(&self) {
        FrameTransport::disconnect(self).await;
    }

    async fn health(&self) -> Result<Value, TransportError> {
        self.send("health", None).await
    }

    fn take_events(&self) -> Option<mpsc::Receiver<EventFrame>> {
        FrameTransport::take_events(self)
    }
}
