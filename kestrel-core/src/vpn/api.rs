//! Account API client
//!
//! Remote lookups consumed by failure investigation: the count of active
//! sessions for the account, freshly issued credentials, and the server
//! certificate cached during attempt preparation.

use crate::error::ApiError;
use crate::types::{Credentials, SessionSecret};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Remote lookups against the account service
#[async_trait]
pub trait ApiService: Send + Sync {
    /// Number of sessions currently active for the account
    async fn fetch_active_session_count(&self) -> Result<u32, ApiError>;

    /// Freshly issued account credentials
    async fn fetch_refreshed_credentials(&self) -> Result<Credentials, ApiError>;

    /// Server certificate (DER) for tunnel validation
    async fn fetch_server_certificate(&self) -> Result<Vec<u8>, ApiError>;
}

#[derive(Deserialize)]
struct SessionCountResponse {
    active: u32,
}

#[derive(Deserialize)]
struct CredentialsResponse {
    secret: String,
    max_concurrent_sessions: u32,
    #[serde(default)]
    delinquent: bool,
}

impl From<CredentialsResponse> for Credentials {
    fn from(response: CredentialsResponse) -> Self {
        Credentials::new(
            response.max_concurrent_sessions,
            response.delinquent,
            SessionSecret::new(response.secret),
        )
    }
}

/// HTTP implementation of the account API
pub struct RestApiService {
    client: Client,
    base_url: Url,
}

impl RestApiService {
    /// Create a client for the given API base URL
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("Failed to parse URL: {}", e)))?;

        match base_url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ApiError::InvalidUrl(format!(
                    "Only HTTP/HTTPS schemes are supported, got: {}",
                    scheme
                )));
            }
        }

        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "account API request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl ApiService for RestApiService {
    async fn fetch_active_session_count(&self) -> Result<u32, ApiError> {
        let response = self.get("v1/sessions").await?;
        let payload: SessionCountResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(payload.active)
    }

    async fn fetch_refreshed_credentials(&self) -> Result<Credentials, ApiError> {
        let response = self.get("v1/credentials").await?;
        let payload: CredentialsResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(payload.into())
    }

    async fn fetch_server_certificate(&self) -> Result<Vec<u8>, ApiError> {
        let response = self.get("v1/certificate").await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(body.to_vec())
    }
}
