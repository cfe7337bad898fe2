//! Sync run error types
//!
//! [`SyncError`] classifies one failure inside a run. [`AggregateError`] is
//! what a run hands back: every error it collected, the content streams that
//! still have to be disposed, and the last phase the run reached.

use std::fmt;
use std::path::PathBuf;

use cloudmirror_core::domain::{ContentStream, DomainError, EventId};
use thiserror::Error;

/// Errors raised while processing a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote service could not be reached or answered badly
    #[error("Remote communication failed: {0:#}")]
    Transport(anyhow::Error),

    /// Applying a server-declared change to the local tree failed
    #[error("Local apply failed for event {event_id} at {}: {error:#}", path.display())]
    LocalApply {
        event_id: EventId,
        path: PathBuf,
        error: anyhow::Error,
    },

    /// Downloading content failed; `cleanup` holds the staging cleanup failure, if any
    #[error(
        "Download failed for event {event_id} at {}: {error:#}{}",
        path.display(),
        cleanup.as_ref().map(|c| format!(" (staging cleanup also failed: {c})")).unwrap_or_default()
    )]
    Download {
        event_id: EventId,
        path: PathBuf,
        error: anyhow::Error,
        cleanup: Option<std::io::Error>,
    },

    /// Uploading content failed
    #[error("Upload failed for event {event_id} at {}: {error:#}", path.display())]
    Upload {
        event_id: EventId,
        path: PathBuf,
        error: anyhow::Error,
    },

    /// No content uploader is configured
    #[error("No uploader configured; event {event_id} at {} stays queued", path.display())]
    UploadUnavailable { event_id: EventId, path: PathBuf },

    /// The server declared a conflict for this event
    #[error("Conflict: server rejected {action} for event {event_id} at {}", path.display())]
    Conflict {
        event_id: EventId,
        action: String,
        path: PathBuf,
    },

    /// The server response did not account for a change that was sent
    #[error("Unmatched: no server event for event {event_id} at {}", path.display())]
    Unmatched { event_id: EventId, path: PathBuf },

    /// A change or response broke a contract between components
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// The dependency resolver failed without a usable partition
    #[error("Dependency resolution failed: {0:#}")]
    ResolverFatal(anyhow::Error),

    /// The dependency resolver reported an error next to a usable partition
    #[error("Dependency resolution reported: {0:#}")]
    Resolver(anyhow::Error),

    /// Pulling changes from the change source failed
    #[error("Change source failed: {0:#}")]
    ChangeSource(anyhow::Error),

    /// Handing changes back to the processing queue failed
    #[error("Re-injecting changes failed: {0:#}")]
    Reinject(anyhow::Error),

    /// The local index rejected an update
    #[error("Sync index update failed: {0:#}")]
    Index(anyhow::Error),

    /// Filesystem I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Domain invariant violated
    #[error(transparent)]
    Domain(#[from] DomainError),
}

// ============================================================================
// SyncPhase
// ============================================================================

/// Breadcrumb of how far a run got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Setup,
    GrabChanges,
    FirstSweep,
    CapBatch,
    Communicate,
    MergeIndex,
    ResolveDependencies,
    SecondSweep,
    Checkpoint,
    StartTransfers,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Setup => "setup",
            SyncPhase::GrabChanges => "grab_changes",
            SyncPhase::FirstSweep => "first_sweep",
            SyncPhase::CapBatch => "cap_batch",
            SyncPhase::Communicate => "communicate",
            SyncPhase::MergeIndex => "merge_index",
            SyncPhase::ResolveDependencies => "resolve_dependencies",
            SyncPhase::SecondSweep => "second_sweep",
            SyncPhase::Checkpoint => "checkpoint",
            SyncPhase::StartTransfers => "start_transfers",
        };
        f.write_str(s)
    }
}

// ============================================================================
// AggregateError
// ============================================================================

/// Everything that went wrong during one run
///
/// Streams are tracked next to the errors so they can be disposed before the
/// run returns. A value holding only streams is not worth logging.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<SyncError>,
    streams: Vec<ContentStream>,
    phase: SyncPhase,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: SyncError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = SyncError>) {
        self.errors.extend(errors);
    }

    /// Marks a stream for disposal at the end of the run
    pub fn dispose_later(&mut self, stream: ContentStream) {
        if !self.streams.iter().any(|s| s.ptr_eq(&stream)) {
            self.streams.push(stream);
        }
    }

    pub fn set_phase(&mut self, phase: SyncPhase) {
        self.phase = phase;
    }

    /// Last phase reached
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when nothing at all was collected
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.streams.is_empty()
    }

    /// Number of streams still waiting for disposal
    pub fn pending_streams(&self) -> usize {
        self.streams.len()
    }

    /// Disposes every collected stream
    pub fn dispose_streams(&mut self) {
        for stream in self.streams.drain(..) {
            stream.dispose();
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s) during sync run (last phase: {})",
            self.errors.len(),
            self.phase
        )?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "\n  [{}] {}", i + 1, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_event() {
        let err = SyncError::Conflict {
            event_id: EventId::new(7),
            action: "modify_file".to_string(),
            path: PathBuf::from("/root/a.txt"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Conflict"));
        assert!(msg.contains("event 7"));
        assert!(msg.contains("/root/a.txt"));
    }

    #[test]
    fn test_download_error_keeps_both_failures() {
        let err = SyncError::Download {
            event_id: EventId::new(3),
            path: PathBuf::from("/root/b.bin"),
            error: anyhow::anyhow!("disk full"),
            cleanup: Some(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )),
        };
        let msg = err.to_string();
        assert!(msg.contains("disk full"));
        assert!(msg.contains("read-only"));
    }

    #[test]
    fn test_streams_only_aggregate_has_no_errors() {
        let mut agg = AggregateError::new();
        let stream = ContentStream::from_bytes(vec![1]);
        agg.dispose_later(stream.clone());
        agg.dispose_later(stream.clone());

        assert!(!agg.is_empty());
        assert!(!agg.has_errors());
        assert_eq!(agg.pending_streams(), 1);

        agg.dispose_streams();
        assert!(stream.is_disposed());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_display_lists_errors_and_phase() {
        let mut agg = AggregateError::new();
        agg.push(SyncError::ContractViolation("bad".into()));
        agg.set_phase(SyncPhase::Communicate);
        let msg = agg.to_string();
        assert!(msg.starts_with("1 error(s)"));
        assert!(msg.contains("last phase: communicate"));
        assert!(msg.contains("Contract violation: bad"));
    }
}
