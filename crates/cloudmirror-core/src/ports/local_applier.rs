//! Local applier port
//!
//! Applies a server-declared (FromRemote) change to the local tree: folder
//! creation, deletes, renames, and moving a staged download into place.

use crate::domain::Change;

/// Port trait for applying changes to the local filesystem
#[async_trait::async_trait]
pub trait ILocalApplier: Send + Sync {
    /// Applies one change to the local tree
    async fn apply_sync_from_change(&self, change: &Change) -> anyhow::Result<()>;
}
