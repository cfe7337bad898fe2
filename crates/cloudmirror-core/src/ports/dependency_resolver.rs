//! Dependency resolver port
//!
//! The resolver decides which changes may run now and which must wait for
//! another change. Its partition is a function of the whole input, so callers
//! re-invoke it whenever the input set changes.

use crate::domain::{Change, PendingChange};

/// Partition returned by [`IDependencyResolver::assign_dependencies`]
#[derive(Debug, Default)]
pub struct DependencyAssignment {
    /// Changes with no unmet dependency, each carrying its waiting dependents
    pub top_level: Vec<PendingChange>,
    /// Changes with no recovery path in this run; they go to the failure queue
    pub top_level_errors: Vec<Change>,
    /// Error raised while resolving, alongside whatever partition was produced
    pub error: Option<anyhow::Error>,
}

impl DependencyAssignment {
    /// An error with nothing usable next to it
    pub fn is_fatal(&self) -> bool {
        self.error.is_some() && self.top_level.is_empty() && self.top_level_errors.is_empty()
    }
}

/// Port trait for dependency assignment
#[async_trait::async_trait]
pub trait IDependencyResolver: Send + Sync {
    /// Partitions pending and failed changes
    ///
    /// # Arguments
    /// * `pending` - Changes that did not complete this pass, with their streams
    /// * `failed` - Failed changes (streamless)
    async fn assign_dependencies(
        &self,
        pending: Vec<PendingChange>,
        failed: Vec<Change>,
    ) -> DependencyAssignment;
}
