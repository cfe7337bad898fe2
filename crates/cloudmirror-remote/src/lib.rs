//! cloudmirror remote - HTTP adapter for the remote sync service
//!
//! Provides an async client for:
//! - `SyncTo`: pushing a batch of local changes and reading the server's verdicts
//! - `SyncFrom`: pulling everything that changed since a checkpoint
//! - `Download`: fetching the raw bytes behind a storage key
//!
//! ## Modules
//!
//! - [`client`] - HTTP client for the three endpoints
//! - [`provider`] - [`IRemoteService`](cloudmirror_core::ports::IRemoteService) implementation

pub mod client;
pub mod provider;

use thiserror::Error;

/// Errors that can occur when communicating with the remote sync service
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a status other than 200
    #[error("{path} returned HTTP {status}: {body}")]
    Status {
        status: u16,
        path: String,
        /// Response body, read best-effort for diagnostics
        body: String,
    },

    /// A network-level error occurred (including timeouts)
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response body could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// True when the request timed out before a response arrived
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::NetworkError(e) if e.is_timeout())
    }

    /// HTTP status of the failed call, if the service answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
