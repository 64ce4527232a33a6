use catflap_keychain::TrustError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("ssh authentication failed")]
    Auth,
    #[error("connection timed out")]
    Timeout,
    #[error("host key mismatch for {0}")]
    HostKeyMismatch(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("not connected")]
    NotConnected,
    #[error("ssh error: {0}")]
    Ssh(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Fatal errors must not be retried with the same inputs: wrong key or a
    /// changed host identity does not heal with backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelError::Auth | TunnelError::HostKeyMismatch(_))
    }
}

impl From<russh::Error> for TunnelError {
    fn from(err: russh::Error) -> Self {
        TunnelError::Ssh(err.to_string())
    }
}

impl From<TrustError> for TunnelError {
    fn from(err: TrustError) -> Self {
        match err {
            TrustError::HostKeyMismatch(host) => TunnelError::HostKeyMismatch(host),
            other => TunnelError::Ssh(other.to_string()),
        }
    }
}
