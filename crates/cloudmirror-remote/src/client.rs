//! Remote sync service HTTP client
//!
//! Provides a typed HTTP client for the three endpoints of the sync service.
//! Handles the bearer token, the request timeout, JSON bodies and the
//! "anything but 200 is an error" rule.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cloudmirror_core::ports::SyncFromRequest;
//! use cloudmirror_remote::client::RemoteClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RemoteClient::with_base_url("https://sync.example.com/api")?
//!     .with_access_token("access-token-here");
//! let response = client
//!     .sync_from(&SyncFromRequest { last_sync_id: None })
//!     .await?;
//! println!("now at {}", response.sync_id);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use cloudmirror_core::config::RemoteConfig;
use cloudmirror_core::ports::{DownloadRequest, SyncFromRequest, SyncResponse, SyncToRequest};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::RemoteError;

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Upper bound on how much of an error body is kept for diagnostics
const MAX_ERROR_BODY: usize = 4096;

pub const SYNC_TO_PATH: &str = "/sync/to";
pub const SYNC_FROM_PATH: &str = "/sync/from";
pub const DOWNLOAD_PATH: &str = "/sync/download";

// ============================================================================
// RemoteClient
// ============================================================================

/// HTTP client for the remote sync service
///
/// Wraps `reqwest::Client` with the base URL, an optional bearer token and a
/// fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests, without a trailing slash
    base_url: String,
    /// Bearer token, if the service requires one
    access_token: Option<String>,
}

impl RemoteClient {
    /// Creates a client from the `remote` configuration section
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut client = Self::build(&config.base_url, config.request_timeout())?;
        client.access_token = config.access_token.clone();
        Ok(client)
    }

    /// Creates a client with a custom base URL and the default timeout
    /// (useful for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        Self::build(&base_url.into(), DEFAULT_REQUEST_TIMEOUT)
    }

    fn build(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    /// Sets the bearer token
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Updates the access token (e.g., after a token refresh)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
        debug!("Updated RemoteClient access token");
    }

    /// Returns the current access token, if any
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a request builder for the given method and path
    ///
    /// Prepends the base URL and adds the Authorization header when a token is set.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, &url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `POST /sync/to`
    pub async fn sync_to(&self, request: &SyncToRequest) -> Result<SyncResponse, RemoteError> {
        debug!(events = request.events.len(), "POST {}", SYNC_TO_PATH);
        self.post_json(SYNC_TO_PATH, request).await
    }

    /// `POST /sync/from`
    pub async fn sync_from(&self, request: &SyncFromRequest) -> Result<SyncResponse, RemoteError> {
        debug!(
            has_sync_id = request.last_sync_id.is_some(),
            "POST {}", SYNC_FROM_PATH
        );
        self.post_json(SYNC_FROM_PATH, request).await
    }

    /// `POST /sync/download`, returning the raw body
    pub async fn download(&self, storage_key: &str) -> Result<Vec<u8>, RemoteError> {
        let body = DownloadRequest {
            storage_key: storage_key.to_string(),
        };
        let response = self
            .request(Method::POST, DOWNLOAD_PATH)
            .json(&body)
            .send()
            .await?;
        let response = ensure_ok(DOWNLOAD_PATH, response).await?;

        let bytes = response.bytes().await?;
        debug!(storage_key, bytes = bytes.len(), "Downloaded content");
        Ok(bytes.to_vec())
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.request(Method::POST, path).json(body).send().await?;
        let response = ensure_ok(path, response).await?;

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            RemoteError::InvalidResponse(format!("{path}: {e}: {}", truncate(&text)))
        })
    }
}

/// Turns any non-200 response into an error carrying the body
async fn ensure_ok(path: &str, response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(text) => truncate(&text),
        Err(e) => format!("<body unavailable: {e}>"),
    };
    warn!(path, status = status.as_u16(), "Remote call failed");
    Err(RemoteError::Status {
        status: status.as_u16(),
        path: path.to_string(),
        body,
    })
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
