use crate::error::TransportError;
use url::Url;

/// Apply the gateway URL scheme policy: explicit `wss://` passes through,
/// `ws://` is allowed only for loopback hosts (traffic that cannot leave
/// the device, i.e. an already-tunneled port) and is otherwise upgraded,
/// and a bare `host[:port]` is assumed `wss://`.
pub fn normalize_gateway_url(raw: &str) -> Result<String, TransportError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(raw, "empty url"));
    }

    let normalized = if trimmed.strip_prefix("wss://").is_some() {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        if is_loopback_host(rest) {
            trimmed.to_string()
        } else {
            format!("wss://{}", rest)
        }
    } else if trimmed.contains("://") {
        return Err(invalid(raw, "unsupported scheme"));
    } else {
        format!("wss://{}", trimmed)
    };

    Url::parse(&normalized).map_err(|e| invalid(raw, &e.to_string()))?;
    Ok(normalized)
}

fn invalid(url: &str, reason: &str) -> TransportError {
    TransportError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

fn is_loopback_host(after_scheme: &str) -> bool {
    let end = after_scheme
        .find(['/', '?', '#'])
        .unwrap_or(after_scheme.len());
    let authority = &after_scheme[..end];
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        match bracketed.find(']') {
            Some(close) => &bracketed[..close],
            None => return false,
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, _port)) => host,
            None => authority,
        }
    };
    let host = host.to_ascii_lowercase();
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_ws_passes_through_unchanged() {
        assert_eq!(normalize_gateway_url("ws://localhost:9").unwrap(), "ws://localhost:9");
        assert_eq!(normalize_gateway_url("ws://127.0.0.1:9").unwrap(), "ws://127.0.0.1:9");
        assert_eq!(normalize_gateway_url("ws://[::1]:9").unwrap(), "ws://[::1]:9");
    }

    #[test]
    fn plaintext_to_remote_hosts_is_upgraded() {
        assert_eq!(
            normalize_gateway_url("ws://example.com:9").unwrap(),
            "wss://example.com:9"
        );
        assert_eq!(
            normalize_gateway_url("ws://gateway.internal/path").unwrap(),
            "wss://gateway.internal/path"
        );
    }

    #[test]
    fn bare_host_is_assumed_secure() {
        assert_eq!(normalize_gateway_url("example.com").unwrap(), "wss://example.com");
        assert_eq!(
            normalize_gateway_url(" example.com:8443 ").unwrap(),
            "wss://example.com:8443"
        );
    }

    #[test]
    fn explicit_wss_is_untouched() {
        assert_eq!(
            normalize_gateway_url("wss://gateway.example.com:443/ws").unwrap(),
            "wss://gateway.example.com:443/ws"
        );
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(matches!(
            normalize_gateway_url("http://example.com"),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            normalize_gateway_url(""),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn loopback_lookalikes_are_not_loopback() {
        assert_eq!(
            normalize_gateway_url("ws://localhost.evil.com:9").unwrap(),
            "wss://localhost.evil.com:9"
        );
    }
}
