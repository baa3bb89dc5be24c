use serde::{Deserialize, Serialize};

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Body of `POST /api/generate-session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateSessionResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Pairing URL to be rendered as a QR code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerateSessionResponse {
    pub fn success(session_id: impl Into<String>, qr_data: impl Into<String>) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            session_id: Some(session_id.into()),
            qr_data: Some(qr_data.into()),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            session_id: None,
            qr_data: None,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parses_registry_success_body() {
        let body = r#"{"status":"success","session_id":"abc123","qr_data":"https://x/mobile/abc123"}"#;
        let parsed: GenerateSessionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed, GenerateSessionResponse::success("abc123", "https://x/mobile/abc123"));
    }

    #[test_timeout::timeout]
    fn non_success_status_is_not_success() {
        let parsed: GenerateSessionResponse =
            serde_json::from_str(r#"{"status":"busy"}"#).unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.session_id, None);
    }
}
