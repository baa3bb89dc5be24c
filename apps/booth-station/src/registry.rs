use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use booth_proto::{validate_session_id, GenerateSessionResponse};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry responded with status {0}")]
    HttpStatus(StatusCode),
    #[error("registry rejected request: {0}")]
    Rejected(String),
    #[error("invalid registry response: {0}")]
    InvalidResponse(String),
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),
}

/// A session handed out by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub session_id: String,
    /// Pairing payload to render for the remote.
    pub pairing_url: Url,
}

#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn generate_session(
        &self,
        base_url: &Url,
    ) -> Result<GenerateSessionResponse, RegistryError>;
}

pub struct HttpRegistry {
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn new() -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RegistryBackend for HttpRegistry {
    async fn generate_session(
        &self,
        base_url: &Url,
    ) -> Result<GenerateSessionResponse, RegistryError> {
        let endpoint = base_url.join("api/generate-session").map_err(|err| {
            RegistryError::InvalidConfig(format!("invalid generate-session endpoint: {err}"))
        })?;
        let response = self.client.post(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::HttpStatus(response.status()));
        }
        Ok(response.json::<GenerateSessionResponse>().await?)
    }
}

/// Requests sessions from the registry and validates what comes back.
/// Failures are returned to the caller; nothing here retries.
#[derive(Clone)]
pub struct SessionManager {
    base_url: Arc<Url>,
    backend: Arc<dyn RegistryBackend>,
}

impl SessionManager {
    pub fn new(base_url: Url) -> Result<Self, RegistryError> {
        Ok(Self::with_backend(base_url, Arc::new(HttpRegistry::new()?)))
    }

    pub fn with_backend(base_url: Url, backend: Arc<dyn RegistryBackend>) -> Self {
        Self {
            base_url: Arc::new(base_url),
            backend,
        }
    }

    pub async fn generate(&self) -> Result<SessionTicket, RegistryError> {
        let response = self.backend.generate_session(&self.base_url).await?;
        if !response.is_success() {
            return Err(RegistryError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| format!("status `{}`", response.status)),
            ));
        }
        let GenerateSessionResponse {
            session_id,
            qr_data,
            ..
        } = response;

        let session_id = session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RegistryError::InvalidResponse("missing session_id".into()))?;
        validate_session_id(&session_id)
            .map_err(|err| RegistryError::InvalidResponse(err.to_string()))?;

        let qr_data = qr_data
            .ok_or_else(|| RegistryError::InvalidResponse("missing qr_data".into()))?;
        let pairing_url = Url::parse(qr_data.trim()).map_err(|err| {
            RegistryError::InvalidResponse(format!("qr_data is not a url '{qr_data}': {err}"))
        })?;

        debug!(session_id = %session_id, pairing_url = %pairing_url, "registry issued session");
        Ok(SessionTicket {
            session_id,
            pairing_url,
        })
    }
}
