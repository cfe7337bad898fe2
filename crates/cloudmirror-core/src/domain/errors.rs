//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! invalid change shapes, unknown wire vocabulary and path errors.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not within the configured sync root
    #[error("Path not within sync root: {0}")]
    PathNotInSyncRoot(String),

    /// A change whose shape breaks a domain invariant (e.g. a modified folder)
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// An action string the remote vocabulary does not define
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A status string the remote vocabulary does not define
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}
