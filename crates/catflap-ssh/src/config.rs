use russh::keys::PrivateKey;

#[derive(Clone)]
pub struct TunnelConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key: PrivateKey,
    /// Forward target as seen from the SSH server, typically the gateway's
    /// loopback listener.
    pub remote_host: String,
    pub remote_port: u16,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
}

impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .finish_non_exhaustive()
    }
}
