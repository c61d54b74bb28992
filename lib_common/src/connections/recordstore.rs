//! # Record Store Client
//!
//! Client for the application-facing record store (the sink). Authenticates
//! against the admin password endpoint, caches the returned bearer token and
//! re-authenticates once on a 401. An auth failure is a credential problem,
//! never a data error.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::configs::settings::SinkSettings;
use crate::models::{RecordPage, SinkRecord};
use crate::retrieve::{ApiClient, ApiResponse};

#[derive(Debug, Error)]
pub enum SinkError {
    /// Network-level failure; retried with backoff by callers.
    #[error("sink transport error: {0}")]
    Transport(String),
    /// Authentication rejected; triggers re-auth, not a data error.
    #[error("sink authentication failed: {0}")]
    Auth(String),
    /// The store rejected the request.
    #[error("sink rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Transport(_) => true,
            SinkError::Rejected { status, .. } => *status >= 500,
            SinkError::Auth(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SinkError::Auth(_))
    }
}

/// Write/read access to the record store, as used by the pipeline, the
/// integrity checker, the health monitor, and the backup manager.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn authenticate(&self) -> Result<(), SinkError>;
    async fn create_record(&self, collection: &str, record: &SinkRecord) -> Result<(), SinkError>;
    async fn create_batch(&self, collection: &str, records: &[SinkRecord]) -> Result<(), SinkError>;
    async fn list_records(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RecordPage, SinkError>;
    async fn count_records(&self, collection: &str) -> Result<u64, SinkError>;
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

/// HTTP client for the record store REST surface.
pub struct SinkClient {
    api: ApiClient,
    identity: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl SinkClient {
    pub fn new(settings: &SinkSettings) -> anyhow::Result<Self> {
        Ok(Self {
            api: ApiClient::new(&settings.base_url, 3)?,
            identity: settings.admin_identity.clone(),
            password: settings.admin_password.clone(),
            token: RwLock::new(None),
        })
    }

    async fn auth_headers(&self) -> Result<HeaderMap, SinkError> {
        let guard = self.token.read().await;
        let token = guard
            .as_deref()
            .ok_or_else(|| SinkError::Auth("no token cached".into()))?;
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SinkError::Auth(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn ensure_token(&self) -> Result<(), SinkError> {
        if self.token.read().await.is_none() {
            self.authenticate().await?;
        }
        Ok(())
    }

    /// Sends an authenticated request; on a 401 the token is refreshed and
    /// the request replayed exactly once.
    async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, SinkError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        self.ensure_token().await?;
        let headers = self.auth_headers().await?;
        let response = self
            .api
            .request::<T, &B>(method.clone(), path, query, Some(headers), body)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if response.status != 401 {
            return Ok(response);
        }

        log::warn!("record store token expired, re-authenticating");
        self.authenticate().await?;
        let headers = self.auth_headers().await?;
        self.api
            .request::<T, &B>(method, path, query, Some(headers), body)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    fn check<T>(response: ApiResponse<T>) -> Result<T, SinkError> {
        if response.success {
            response
                .data
                .ok_or_else(|| SinkError::Rejected { status: response.status, body: "empty body".into() })
        } else {
            Err(SinkError::Rejected {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl super::supervisor::Connector for SinkClient {
    async fn connect(&self) -> Result<(), String> {
        self.authenticate().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl RecordStore for SinkClient {
    async fn authenticate(&self) -> Result<(), SinkError> {
        let body = serde_json::json!({
            "identity": self.identity,
            "password": self.password,
        });
        let response = self
            .api
            .post::<AuthResponse, _>("admins/auth-with-password", None, &body)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !response.success {
            return Err(SinkError::Auth(format!(
                "status {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            )));
        }
        let auth = response
            .data
            .ok_or_else(|| SinkError::Auth("auth endpoint returned no token".into()))?;
        *self.token.write().await = Some(auth.token);
        Ok(())
    }

    async fn create_record(&self, collection: &str, record: &SinkRecord) -> Result<(), SinkError> {
        let path = format!("collections/{}/records", collection);
        let response = self
            .send::<serde_json::Value, _>(Method::POST, &path, &[], Some(&record))
            .await?;
        Self::check(response).map(|_| ())
    }

    async fn create_batch(&self, collection: &str, records: &[SinkRecord]) -> Result<(), SinkError> {
        let path = format!("collections/{}/records/batch", collection);
        let body = serde_json::json!({ "records": records });
        let response = self
            .send::<serde_json::Value, _>(Method::POST, &path, &[], Some(&body))
            .await?;
        Self::check(response).map(|_| ())
    }

    async fn list_records(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RecordPage, SinkError> {
        let path = format!("collections/{}/records", collection);
        let query = [
            ("page", page.to_string()),
            ("perPage", per_page.to_string()),
            ("sort", "+timestamp".to_string()),
        ];
        let response = self
            .send::<RecordPage, ()>(Method::GET, &path, &query, None)
            .await?;
        Self::check(response)
    }

    async fn count_records(&self, collection: &str) -> Result<u64, SinkError> {
        let page = self.list_records(collection, 1, 1).await?;
        Ok(page.total_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_follows_status() {
        assert!(SinkError::Transport("reset".into()).is_transient());
        assert!(SinkError::Rejected { status: 502, body: String::new() }.is_transient());
        assert!(!SinkError::Rejected { status: 400, body: String::new() }.is_transient());
        assert!(!SinkError::Auth("bad password".into()).is_transient());
        assert!(SinkError::Auth("bad password".into()).is_auth());
    }
}
