//! # HTTP Retrieval Utilities
//!
//! A robust, asynchronous API client wrapper around `reqwest`, with
//! middleware support for exponential backoff retries and standardized JSON
//! response handling. Both store clients are built on top of this.

use base64::{engine::general_purpose, Engine as _};
use reqwest::{
    header::{HeaderMap, AUTHORIZATION},
    Method, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with metadata about the HTTP
/// transaction. Non-2xx statuses are not errors at this layer; callers decide
/// what a failure means for them.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs, bearer or
/// basic authentication, and automatic retries of transient failures.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// Optional Bearer token used for authorization.
    auth_token: Option<String>,
    /// Optional basic credentials (username, password).
    basic_auth: Option<(String, Option<String>)>,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a transient-retry policy.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API.
    /// * `max_retries` - Retries performed by the middleware on transient
    ///   network failures.
    pub fn new(base_url: &str, max_retries: u32) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = ClientBuilder::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token: None,
            basic_auth: None,
        })
    }

    /// Sets the Bearer token injected into every subsequent request.
    pub fn set_auth_token(&mut self, token: Option<String>) {
        self.auth_token = token;
    }

    /// Uses basic credentials on every request instead of a Bearer token.
    pub fn with_basic_auth(mut self, username: String, password: Option<String>) -> Self {
        self.basic_auth = Some((username, password));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a generic HTTP request and handles the response.
    ///
    /// Manages URL joining, query parameters, authentication, and JSON
    /// serialization/deserialization.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining or network execution fails;
    /// HTTP-level failures are reported through `ApiResponse::success`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut full_url = self.base_url.join(path)?;
        if !query.is_empty() {
            let mut pairs = full_url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        } else if let Some((user, pass)) = &self.basic_auth {
            let credentials = format!("{}:{}", user, pass.as_deref().unwrap_or_default());
            let encoded = general_purpose::STANDARD.encode(credentials);
            req = req.header(AUTHORIZATION, format!("Basic {}", encoded));
        }

        if let Some(b) = body {
            use reqwest::header::CONTENT_TYPE;
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let success = status.is_success();

        if success {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// Convenience GET returning deserialized JSON.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
    ) -> anyhow::Result<ApiResponse<T>> {
        self.request::<T, ()>(Method::GET, path, query, headers, None).await
    }

    /// Convenience POST with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
        body: B,
    ) -> anyhow::Result<ApiResponse<T>> {
        self.request(Method::POST, path, &[], headers, Some(body)).await
    }
}
