//! HTTP backend client.
//!
//! Every entity kind is pushed with the same shape: POST to its resource
//! collection with the serialized payload and an `Idempotency-Key` header
//! carrying the client-side entity id, so retries after an ambiguous
//! failure cannot create duplicates server-side.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::models::EntityKind;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("backend not configured; set api.base_url and api.api_key")]
    NotConfigured,
    #[error("network error: {0}")]
    Network(String),
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("request rejected (HTTP {status}): {message}")]
    Validation { status: u16, message: String },
    #[error("authentication failed")]
    Auth,
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether a later retry of the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Server(_))
    }
}

/// The remote side of the sync pipeline.
///
/// Implemented by [`ApiClient`] for production and by in-memory fakes in
/// processor tests.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Creates (or idempotently re-creates) a record remotely and returns
    /// the backend-assigned id.
    async fn create_record(
        &self,
        kind: EntityKind,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> Result<String, RemoteError>;
}

/// Supplies bearer tokens to the API client.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError>;

    /// Called after a 401/403 so a fresh token can be issued. Returns the
    /// new token, or None if refresh is not supported.
    async fn refresh_token(&self) -> Result<Option<String>, RemoteError>;
}

/// Fixed credentials loaded from config. Refresh is a no-op.
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<Option<String>, RemoteError> {
        Ok(self.token.clone())
    }

    async fn refresh_token(&self) -> Result<Option<String>, RemoteError> {
        Ok(None)
    }
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    credentials: Box<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        credentials: Box<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            credentials,
        }
    }

    fn endpoint(&self, kind: EntityKind) -> String {
        format!("{}/v1/{}", self.base_url, kind.resource())
    }

    async fn post_once(
        &self,
        url: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut request = self
            .http
            .post(url)
            .header("X-Api-Key", &self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(payload);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))
    }

    async fn decode_created(response: reqwest::Response) -> Result<String, RemoteError> {
        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(created.id)
    }
}

#[async_trait]
impl RemoteBackend for ApiClient {
    async fn create_record(
        &self,
        kind: EntityKind,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> Result<String, RemoteError> {
        let url = self.endpoint(kind);
        let token = self.credentials.bearer_token().await?;

        let mut response = self
            .post_once(&url, idempotency_key, payload, token.as_deref())
            .await?;
        let mut status = response.status();

        // One refresh-and-retry on an auth failure, then give up.
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            match self.credentials.refresh_token().await? {
                Some(fresh) => {
                    tracing::debug!(kind = %kind, "retrying after token refresh");
                    response = self
                        .post_once(&url, idempotency_key, payload, Some(&fresh))
                        .await?;
                    status = response.status();
                }
                None => return Err(RemoteError::Auth),
            }
        }

        if status.is_success() {
            return Self::decode_created(response).await;
        }

        let code = status.as_u16();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(RemoteError::Auth)
        } else if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            Err(RemoteError::Validation {
                status: code,
                message,
            })
        } else {
            Err(RemoteError::Server(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Network("timeout".into()).is_transient());
        assert!(RemoteError::Server(503).is_transient());
        assert!(!RemoteError::Auth.is_transient());
        assert!(!RemoteError::Validation {
            status: 422,
            message: "bad quantity".into()
        }
        .is_transient());
        assert!(!RemoteError::NotConfigured.is_transient());
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = ApiClient::new(
            "https://api.lume.example/",
            "key",
            Box::new(StaticCredentials::new(None)),
        );
        assert_eq!(
            client.endpoint(EntityKind::ProgressEntry),
            "https://api.lume.example/v1/progress-entries"
        );
        assert_eq!(
            client.endpoint(EntityKind::MealLog),
            "https://api.lume.example/v1/meal-logs"
        );
    }
}
