use catflap_keychain::IdentityError;
use catflap_ssh::TunnelError;
use catflap_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("gateway error: {0}")]
    Transport(#[from] TransportError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("no saved credentials to reconnect with")]
    NoCredentials,
}

impl CoreError {
    /// Fatal failures abort the reconnect loop: retrying with the same bad
    /// credentials, or trusting a changed host key, would be unsafe.
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::Tunnel(err) => err.is_fatal(),
            CoreError::Transport(err) => err.is_auth_rejection(),
            CoreError::Identity(_) => true,
            CoreError::NoCredentials => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catflap_transport::ConnectKind;

    #[test]
    fn auth_and_host_key_failures_are_fatal() {
        assert!(CoreError::Tunnel(TunnelError::Auth).is_fatal());
        assert!(CoreError::Tunnel(TunnelError::HostKeyMismatch("h".into())).is_fatal());
        assert!(CoreError::Transport(TransportError::Server {
            code: Some("unauthorized".into()),
            message: "no".into(),
        })
        .is_fatal());
        assert!(CoreError::Transport(TransportError::Server {
            code: Some("pairing_required".into()),
            message: "pair first".into(),
        })
        .is_fatal());
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(!CoreError::Tunnel(TunnelError::Timeout).is_fatal());
        assert!(!CoreError::Tunnel(TunnelError::Connect("refused".into())).is_fatal());
        assert!(!CoreError::Transport(TransportError::Connection {
            url: "wss://g".into(),
            kind: ConnectKind::Reset,
            detail: "reset".into(),
        })
        .is_fatal());
        assert!(!CoreError::Transport(TransportError::Timeout).is_fatal());
    }
}
