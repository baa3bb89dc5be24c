//! Pairing payload helpers.
//!
//! The pairing payload is a URL of the form `<base>/mobile/<session_id>`. The
//! station renders it as a QR code; the remote opens it and recovers the id.

use thiserror::Error;
use url::Url;

pub const PAIRING_PATH_SEGMENT: &str = "mobile";
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("pairing link is not a valid url: {0}")]
    InvalidUrl(String),
    #[error("pairing link does not contain a session id")]
    MissingSessionId,
    #[error("session id contains unsupported characters")]
    InvalidSessionId,
    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),
}

/// Build the pairing URL for a session under a public base URL.
pub fn pairing_url(base: &str, session_id: &str) -> Result<Url, PairingError> {
    validate_session_id(session_id)?;
    let trimmed = base.trim().trim_end_matches('/');
    let raw = format!("{trimmed}/{PAIRING_PATH_SEGMENT}/{session_id}");
    Url::parse(&raw).map_err(|err| PairingError::InvalidUrl(err.to_string()))
}

/// Extract the session id from a pairing URL (`.../mobile/<id>`).
pub fn session_id_from_url(raw: &str) -> Result<String, PairingError> {
    let url = Url::parse(raw.trim()).map_err(|err| PairingError::InvalidUrl(err.to_string()))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [.., marker, id] if *marker == PAIRING_PATH_SEGMENT => {
            validate_session_id(id)?;
            Ok((*id).to_string())
        }
        _ => Err(PairingError::MissingSessionId),
    }
}

pub fn validate_session_id(id: &str) -> Result<(), PairingError> {
    if id.is_empty() {
        return Err(PairingError::MissingSessionId);
    }
    if id.len() > MAX_SESSION_ID_LEN
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PairingError::InvalidSessionId);
    }
    Ok(())
}

/// Derive the relay WebSocket endpoint served next to a pairing URL.
pub fn relay_url_for(pairing: &str) -> Result<Url, PairingError> {
    let mut url =
        Url::parse(pairing.trim()).map_err(|err| PairingError::InvalidUrl(err.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(PairingError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| PairingError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn builds_pairing_url_under_base() {
        let url = pairing_url("https://x/", "abc123").unwrap();
        assert_eq!(url.as_str(), "https://x/mobile/abc123");

        let nested = pairing_url("http://127.0.0.1:8080/booth", "abc123").unwrap();
        assert_eq!(nested.as_str(), "http://127.0.0.1:8080/booth/mobile/abc123");
    }

    #[test_timeout::timeout]
    fn extracts_session_id_from_deep_link() {
        assert_eq!(
            session_id_from_url("https://x/mobile/abc123").unwrap(),
            "abc123"
        );
        assert_eq!(
            session_id_from_url("https://x/mobile/abc123/?utm=qr").unwrap(),
            "abc123"
        );
        assert_eq!(
            session_id_from_url("https://x/mobile/").unwrap_err(),
            PairingError::MissingSessionId
        );
        assert_eq!(
            session_id_from_url("https://x/desktop").unwrap_err(),
            PairingError::MissingSessionId
        );
        assert!(matches!(
            session_id_from_url("not a url"),
            Err(PairingError::InvalidUrl(_))
        ));
    }

    #[test_timeout::timeout]
    fn rejects_suspicious_session_ids() {
        assert_eq!(
            validate_session_id("abc$123"),
            Err(PairingError::InvalidSessionId)
        );
        assert_eq!(
            validate_session_id(&"a".repeat(129)),
            Err(PairingError::InvalidSessionId)
        );
        assert!(validate_session_id("0b6c1f0e-58a4-4a43-9d6e-8a3c1c8f5e21").is_ok());
    }

    #[test_timeout::timeout]
    fn relay_url_follows_pairing_scheme() {
        assert_eq!(
            relay_url_for("https://booth.example/mobile/abc").unwrap().as_str(),
            "wss://booth.example/ws"
        );
        assert_eq!(
            relay_url_for("http://127.0.0.1:8080/mobile/abc?x=1").unwrap().as_str(),
            "ws://127.0.0.1:8080/ws"
        );
        assert!(matches!(
            relay_url_for("ftp://host/mobile/abc"),
            Err(PairingError::UnsupportedScheme(_))
        ));
    }
}
