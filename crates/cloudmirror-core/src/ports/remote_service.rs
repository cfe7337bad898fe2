//! Remote service port (driven/secondary port)
//!
//! This module defines the interface to the remote sync service and the
//! wire DTOs it exchanges. The DTOs are port-level types, not domain
//! entities; the communication engine maps them to and from [`Change`].
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific
//!   and don't need domain-level classification.
//! - Field names serialize in snake_case. Unknown fields are ignored and
//!   missing optional fields default, so older servers stay readable.
//!
//! [`Change`]: crate::domain::Change

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata format version sent on every request event
pub const WIRE_VERSION: &str = "1.0";

// ============================================================================
// Events
// ============================================================================

/// Header of one event on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Server-declared outcome. Absent on requests and on server-originated events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub event_id: i64,
    /// Action name, e.g. `add_file`
    pub action: String,
}

/// Metadata block of one event on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventMetadata {
    pub created_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub deleted: bool,
    /// MD5 content hash, hex encoded
    pub hash: Option<String>,
    pub is_folder: bool,
    /// Highest event id in the request batch
    pub last_event_id: i64,
    /// Previous relative path of a rename
    pub relative_from_path: Option<String>,
    pub relative_path: String,
    /// New relative path of a rename
    pub relative_to_path: Option<String>,
    pub revision: Option<String>,
    pub size: u64,
    pub storage_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Symlink target, relative to the sync root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    pub version: String,
}

/// One event on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub header: EventHeader,
    pub metadata: EventMetadata,
}

// ============================================================================
// Requests / responses
// ============================================================================

/// Body of `POST /sync/to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncToRequest {
    /// Last checkpoint known locally
    pub sync_id: Option<String>,
    pub events: Vec<RemoteEvent>,
}

/// Body of `POST /sync/from`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFromRequest {
    pub last_sync_id: Option<String>,
}

/// Body of `POST /sync/download`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub storage_key: String,
}

/// Response to both sync endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// New checkpoint assigned by the server
    pub sync_id: String,
    #[serde(default)]
    pub events: Vec<RemoteEvent>,
}

// ============================================================================
// IRemoteService trait
// ============================================================================

/// Port trait for the remote sync service
#[async_trait::async_trait]
pub trait IRemoteService: Send + Sync {
    /// Sends a batch of local changes and returns the server's verdicts
    async fn sync_to(&self, request: &SyncToRequest) -> anyhow::Result<SyncResponse>;

    /// Asks for everything that changed since `request.last_sync_id`
    async fn sync_from(&self, request: &SyncFromRequest) -> anyhow::Result<SyncResponse>;

    /// Downloads the raw bytes stored under `storage_key`
    async fn download(&self, storage_key: &str) -> anyhow::Result<Vec<u8>>;
}
