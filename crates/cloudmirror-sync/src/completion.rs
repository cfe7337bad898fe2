//! Local completion engine
//!
//! Brings the local side of one change up to date. Server-declared folder
//! operations, deletes and renames are applied on the spot. File content moves
//! in deferred tasks: downloads are staged under the temp directory and renamed
//! into place, uploads go through the configured [`IContentUploader`].
//!
//! A deferred task owns its change from the moment it is handed out. On failure
//! it puts the change (and its dependents) into the failure queue itself; on
//! success it hands the dependents back to the change source.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use cloudmirror_core::domain::{
    Change, ChangeType, ChangeWithDependencies, ContentStream, Direction, EventId, ItemKind,
    PendingChange,
};
use cloudmirror_core::ports::{IContentUploader, ILocalApplier, IRemoteService};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::failure_queue::FailureQueueHandle;
use crate::temp_downloads::TempDownloadRegistry;

/// Future driving one deferred transfer
pub type TransferFuture = Pin<Box<dyn Future<Output = Result<EventId, SyncError>> + Send>>;

/// A transfer the orchestrator schedules but does not await
pub struct CompletionTask {
    pub direction: Direction,
    pub event_id: EventId,
    pub path: PathBuf,
    pub future: TransferFuture,
}

impl fmt::Debug for CompletionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTask")
            .field("direction", &self.direction)
            .field("event_id", &self.event_id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Result of one completion attempt; exactly one of the three applies
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Done synchronously
    Succeeded(EventId),
    /// Work continues in a task that owns the change from now on
    Deferred(CompletionTask),
    /// Nothing was scheduled; the caller keeps the change queued
    Failed(SyncError),
}

/// True for changes with local work to do before or after communicating
///
/// Server-declared changes always need applying. Local changes only need the
/// content upload; deletes, renames and folders travel in the request alone.
pub fn needs_local_completion(change: &Change) -> bool {
    change.direction() == Direction::FromRemote || change.needs_upload()
}

/// Applies, downloads or uploads single changes
pub struct LocalCompletionEngine {
    applier: Arc<dyn ILocalApplier>,
    remote: Arc<dyn IRemoteService>,
    uploader: Option<Arc<dyn IContentUploader>>,
    temp_downloads: Arc<TempDownloadRegistry>,
    failure_queue: FailureQueueHandle,
}

impl LocalCompletionEngine {
    pub fn new(
        applier: Arc<dyn ILocalApplier>,
        remote: Arc<dyn IRemoteService>,
        uploader: Option<Arc<dyn IContentUploader>>,
        temp_downloads: Arc<TempDownloadRegistry>,
        failure_queue: FailureQueueHandle,
    ) -> Self {
        Self {
            applier,
            remote,
            uploader,
            temp_downloads,
            failure_queue,
        }
    }

    /// Attempts local completion of one pending change
    #[tracing::instrument(skip(self, pending), fields(event_id = %pending.event_id()))]
    pub async fn complete(&self, pending: &PendingChange) -> CompletionOutcome {
        let change = pending.change.change();
        let event_id = change.event_id();

        match (change.direction(), change.change_type()) {
            (Direction::FromRemote, ChangeType::Created | ChangeType::Modified)
                if change.item_kind() != ItemKind::Folder =>
            {
                self.start_download(pending.change.clone())
            }
            (Direction::FromRemote, _) => match self.applier.apply_sync_from_change(change).await {
                Ok(()) => {
                    debug!(path = %change.new_path().display(), "Applied server change");
                    CompletionOutcome::Succeeded(event_id)
                }
                Err(error) => CompletionOutcome::Failed(SyncError::LocalApply {
                    event_id,
                    path: change.new_path().to_path_buf(),
                    error,
                }),
            },
            (Direction::ToRemote, _) if change.item_kind() == ItemKind::Folder => {
                CompletionOutcome::Failed(SyncError::ContractViolation(format!(
                    "folder change {change} has no local completion toward the remote side"
                )))
            }
            (Direction::ToRemote, ChangeType::Deleted | ChangeType::Renamed) => {
                CompletionOutcome::Failed(SyncError::ContractViolation(format!(
                    "{change} is carried by communication alone and has no local completion"
                )))
            }
            (Direction::ToRemote, _) => self.start_upload(pending),
        }
    }

    fn start_download(&self, change: ChangeWithDependencies) -> CompletionOutcome {
        let event_id = change.event_id();
        let path = change.change().new_path().to_path_buf();
        let Some(storage_key) = change
            .change()
            .metadata()
            .storage_key
            .clone()
            .filter(|key| !key.trim().is_empty())
        else {
            return CompletionOutcome::Failed(SyncError::ContractViolation(format!(
                "download of {} has no storage key",
                change.change()
            )));
        };

        let job = DownloadJob {
            remote: Arc::clone(&self.remote),
            applier: Arc::clone(&self.applier),
            registry: Arc::clone(&self.temp_downloads),
            failure_queue: self.failure_queue.clone(),
            storage_key,
            change,
        };

        CompletionOutcome::Deferred(CompletionTask {
            direction: Direction::FromRemote,
            event_id,
            path,
            future: Box::pin(job.run()),
        })
    }

    fn start_upload(&self, pending: &PendingChange) -> CompletionOutcome {
        let change = pending.change.change();
        let event_id = change.event_id();
        let path = change.new_path().to_path_buf();

        let Some(uploader) = self.uploader.clone() else {
            return CompletionOutcome::Failed(SyncError::UploadUnavailable { event_id, path });
        };
        let Some(stream) = pending.stream.clone().filter(|s| !s.is_disposed()) else {
            return CompletionOutcome::Failed(SyncError::Upload {
                event_id,
                path,
                error: anyhow::anyhow!("no open content stream"),
            });
        };

        let job = UploadJob {
            uploader,
            failure_queue: self.failure_queue.clone(),
            stream,
            change: pending.change.clone(),
        };

        CompletionOutcome::Deferred(CompletionTask {
            direction: Direction::ToRemote,
            event_id,
            path,
            future: Box::pin(job.run()),
        })
    }
}

// ============================================================================
// Deferred jobs
// ============================================================================

/// Hands dependents of a finished transfer back upstream
async fn release_dependents(failure_queue: &FailureQueueHandle, mut change: ChangeWithDependencies) {
    let dependents = change.take_dependencies();
    if dependents.is_empty() {
        return;
    }
    let count = dependents.len();
    if let Err(e) = failure_queue.reinject(dependents).await {
        warn!(event_id = %change.event_id(), count, error = %e, "Dependents went to the failure queue");
    }
}

struct DownloadJob {
    remote: Arc<dyn IRemoteService>,
    applier: Arc<dyn ILocalApplier>,
    registry: Arc<TempDownloadRegistry>,
    failure_queue: FailureQueueHandle,
    storage_key: String,
    change: ChangeWithDependencies,
}

impl DownloadJob {
    async fn run(self) -> Result<EventId, SyncError> {
        let event_id = self.change.event_id();
        let final_path = self.change.change().new_path().to_path_buf();
        let (correlation_id, staging) = self.registry.register();

        match self.stage_and_apply(&staging).await {
            Ok(()) => {
                self.registry.release(&correlation_id);
                info!(event_id = %event_id, path = %final_path.display(), "Download complete");
                release_dependents(&self.failure_queue, self.change).await;
                Ok(event_id)
            }
            Err(error) => {
                let cleanup = match tokio::fs::remove_file(&staging).await {
                    Ok(()) => None,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => Some(e),
                };
                self.registry.release(&correlation_id);
                self.failure_queue
                    .enqueue_all_and_restart(self.change.into_flattened())
                    .await;
                Err(SyncError::Download {
                    event_id,
                    path: final_path,
                    error,
                    cleanup,
                })
            }
        }
    }

    async fn stage_and_apply(&self, staging: &std::path::Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let change = self.change.change();
        let bytes = self.remote.download(&self.storage_key).await?;
        tokio::fs::write(staging, &bytes)
            .await
            .with_context(|| format!("Failed to write staging file {}", staging.display()))?;
        apply_times(staging, change).await?;

        let rename = Change::new(Direction::FromRemote, ChangeType::Renamed, change.new_path())
            .with_event_id(change.event_id())
            .with_old_path(staging)
            .with_metadata(change.metadata().clone());
        self.applier.apply_sync_from_change(&rename).await
    }
}

/// Copies accessed/modified times from the change onto the staged file
async fn apply_times(staging: &std::path::Path, change: &Change) -> anyhow::Result<()> {
    let metadata = change.metadata();
    if metadata.accessed.is_none() && metadata.modified.is_none() {
        return Ok(());
    }

    let mut times = std::fs::FileTimes::new();
    if let Some(accessed) = metadata.accessed {
        times = times.set_accessed(SystemTime::from(accessed));
    }
    if let Some(modified) = metadata.modified {
        times = times.set_modified(SystemTime::from(modified));
    }

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(staging)
        .await?
        .into_std()
        .await;
    tokio::task::spawn_blocking(move || file.set_times(times)).await??;
    Ok(())
}

struct UploadJob {
    uploader: Arc<dyn IContentUploader>,
    failure_queue: FailureQueueHandle,
    stream: ContentStream,
    change: ChangeWithDependencies,
}

impl UploadJob {
    async fn run(self) -> Result<EventId, SyncError> {
        let event_id = self.change.event_id();
        let result = self
            .uploader
            .upload(self.change.change(), self.stream.clone())
            .await;
        self.stream.dispose();

        match result {
            Ok(()) => {
                info!(event_id = %event_id, "Upload complete");
                release_dependents(&self.failure_queue, self.change).await;
                Ok(event_id)
            }
            Err(error) => {
                let path = self.change.change().new_path().to_path_buf();
                self.failure_queue
                    .enqueue_all_and_restart(self.change.into_flattened())
                    .await;
                Err(SyncError::Upload {
                    event_id,
                    path,
                    error,
                })
            }
        }
    }
}
