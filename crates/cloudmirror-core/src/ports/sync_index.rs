//! Sync index port (driven/secondary port)
//!
//! The local persistent index durably records change events and the last
//! sync checkpoint. The sync run only needs the four operations below.

use std::path::Path;

use crate::domain::{Change, EventId, SyncId};

/// Port trait for the local event index
#[async_trait::async_trait]
pub trait ISyncIndex: Send + Sync {
    /// Records the server's view of a change
    ///
    /// `conflict_change` carries the server's version when the server
    /// declared a conflict; `change` is then the local original.
    async fn merge_to_sql(
        &self,
        change: &Change,
        conflict_change: Option<&Change>,
    ) -> anyhow::Result<()>;

    /// Persists a new checkpoint and marks the given events complete
    ///
    /// `successful_event_ids` is sorted and free of duplicates.
    async fn complete_sync_sql(
        &self,
        new_sync_id: &SyncId,
        successful_event_ids: &[EventId],
        sync_root: &Path,
    ) -> anyhow::Result<()>;

    /// The checkpoint of the last completed sync, if any
    async fn last_sync_id(&self) -> anyhow::Result<Option<SyncId>>;

    /// Marks one event complete after its background transfer finished
    async fn complete_single_event(&self, event_id: EventId) -> anyhow::Result<()>;
}
