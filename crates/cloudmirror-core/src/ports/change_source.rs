//! Change source port (driving side of a sync run)
//!
//! The change source wraps the filesystem monitor's processing queue. A sync
//! run pulls its batch from here, and hands back whatever it cannot finish in
//! the current pass.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific
//!   and don't need domain-level classification.
//! - Re-injection reports rejected items in the `Ok` value. An `Err` means no
//!   item can be assumed accepted.

use crate::domain::{Change, PendingChange};

/// Result of pulling a batch from the change source
#[derive(Debug, Default)]
pub struct GrabbedChanges {
    /// Changes ready for this run, with final metadata and dependents attached
    pub output_changes: Vec<PendingChange>,
    /// Changes that could not even be built into a pending change
    pub changes_in_error: Vec<Change>,
}

/// Port trait for the upstream processing queue
#[async_trait::async_trait]
pub trait IChangeSource: Send + Sync {
    /// Pulls pending changes, merging in the failures dequeued by the caller
    ///
    /// # Arguments
    /// * `initial_failures` - Changes taken out of the failure queue for this run
    async fn grab_changes(&self, initial_failures: Vec<Change>) -> anyhow::Result<GrabbedChanges>;

    /// Pushes changes back onto the processing queue
    ///
    /// # Arguments
    /// * `changes` - Changes to re-inject
    /// * `insert_at_front` - Give them priority over anything already queued
    ///
    /// # Returns
    /// The subset of `changes` the queue rejected
    async fn add_changes_to_processing_queue(
        &self,
        changes: Vec<Change>,
        insert_at_front: bool,
    ) -> anyhow::Result<Vec<Change>>;
}
