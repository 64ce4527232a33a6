use thiserror::Error;

/// Cause classification for socket-level connection errors, derived from
/// the underlying transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    Timeout,
    Dns,
    Unreachable,
    Tls,
    Reset,
    Generic,
}

impl std::fmt::Display for ConnectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectKind::Timeout => "timeout",
            ConnectKind::Dns => "dns",
            ConnectKind::Unreachable => "unreachable",
            ConnectKind::Tls => "tls",
            ConnectKind::Reset => "reset",
            ConnectKind::Generic => "generic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("response missing payload")]
    MissingPayload,
    #[error("server error{}: {}", fmt_code(.code), .message)]
    Server {
        code: Option<String>,
        message: String,
    },
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection error ({kind}) for {url}: {detail}")]
    Connection {
        url: String,
        kind: ConnectKind,
        detail: String,
    },
    #[error("not connected")]
    NotConnected,
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("timed out")]
    Timeout,
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("invalid gateway url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

fn fmt_code(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" [{}]", code),
        None => String::new(),
    }
}

/// Server error codes that mean the credentials or pairing are bad; the
/// supervisor must not retry these with the same inputs.
const AUTH_ERROR_CODES: &[&str] = &["auth", "auth_failed", "unauthorized", "pairing", "pairing_required", "forbidden"];

impl TransportError {
    /// True when the gateway rejected our identity or credentials, as
    /// opposed to the connection merely failing.
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            TransportError::Server { code, .. } => code
                .as_deref()
                .map(|code| AUTH_ERROR_CODES.contains(&code))
                .unwrap_or(false),
            _ => false,
        }
    }
}

pub(crate) fn classify_ws_error(
    err: &tokio_tungstenite::tungstenite::Error,
) -> (ConnectKind, String) {
    use tokio_tungstenite::tungstenite::Error as WsError;
    let detail = err.to_string();
    let kind = match err {
        WsError::Io(io) => classify_io_kind(io),
        WsError::Tls(_) => ConnectKind::Tls,
        WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectKind::Reset,
        _ => ConnectKind::Generic,
    };
    (kind, detail)
}

fn classify_io_kind(err: &std::io::Error) -> ConnectKind {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectKind::Timeout,
        ErrorKind::ConnectionRefused | ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
            ConnectKind::Unreachable
        }
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => ConnectKind::Reset,
        _ => {
            // getaddrinfo failures surface as uncategorized io errors
            let text = err.to_string();
            if text.contains("failed to lookup") || text.contains("name or service not known") {
                ConnectKind::Dns
            } else {
                ConnectKind::Generic
            }
        }
    }
}
