//! Direction-specific transfer pools
//!
//! Uploads and downloads run on separate semaphores so neither direction can
//! starve the other. Tasks are spawned and never awaited by the sync run. Each
//! task reports completion to the index itself and leaves a [`TransferOutcome`]
//! on a channel the next run drains; failures then join that run's aggregate.

use std::sync::{Arc, Mutex};

use cloudmirror_core::config::TransfersConfig;
use cloudmirror_core::domain::{Direction, EventId};
use cloudmirror_core::ports::ISyncIndex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::completion::CompletionTask;
use crate::error::SyncError;

/// How a spawned transfer ended
#[derive(Debug)]
pub struct TransferOutcome {
    pub event_id: EventId,
    pub direction: Direction,
    succeeded: bool,
    error: Option<SyncError>,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.succeeded
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    /// Moves the failure out, leaving the outcome itself intact
    pub fn take_error(&mut self) -> Option<SyncError> {
        self.error.take()
    }
}

pub struct TransferScheduler {
    uploads: Arc<Semaphore>,
    downloads: Arc<Semaphore>,
    index: Arc<dyn ISyncIndex>,
    outcome_tx: mpsc::UnboundedSender<TransferOutcome>,
    outcome_rx: Mutex<mpsc::UnboundedReceiver<TransferOutcome>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TransferScheduler {
    pub fn new(config: &TransfersConfig, index: Arc<dyn ISyncIndex>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            uploads: Arc::new(Semaphore::new(config.upload_concurrent.max(1))),
            downloads: Arc::new(Semaphore::new(config.download_concurrent.max(1))),
            index,
            outcome_tx,
            outcome_rx: Mutex::new(outcome_rx),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn pool(&self, direction: Direction) -> Arc<Semaphore> {
        match direction {
            Direction::ToRemote => Arc::clone(&self.uploads),
            Direction::FromRemote => Arc::clone(&self.downloads),
        }
    }

    /// Starts a task on its direction's pool
    pub fn spawn(&self, task: CompletionTask) {
        let pool = self.pool(task.direction);
        let index = Arc::clone(&self.index);
        let outcome_tx = self.outcome_tx.clone();
        let CompletionTask {
            direction,
            event_id,
            path,
            future,
        } = task;

        let handle = tokio::spawn(async move {
            let _permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(event_id = %event_id, error = %e, "Transfer pool closed");
                    return;
                }
            };

            let error = match future.await {
                Ok(done) => {
                    if let Err(e) = index.complete_single_event(done).await {
                        warn!(event_id = %done, error = %e, "Failed to record event completion");
                    }
                    info!(event_id = %done, direction = %direction, path = %path.display(), "Transfer finished");
                    None
                }
                Err(e) => {
                    error!(event_id = %event_id, direction = %direction, error = %e, "Transfer failed");
                    Some(e)
                }
            };

            // The receiver lives as long as the scheduler; a send error only means shutdown.
            let _ = outcome_tx.send(TransferOutcome {
                event_id,
                direction,
                succeeded: error.is_none(),
                error,
            });
        });

        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Collects outcomes reported since the last drain
    pub fn drain_outcomes(&self) -> Vec<TransferOutcome> {
        let mut rx = self.outcome_rx.lock().unwrap_or_else(|p| p.into_inner());
        let mut outcomes = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Number of spawned tasks that have not finished
    pub fn in_flight(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Waits for every task spawned so far
    pub async fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Transfer task panicked");
            }
        }
    }
}
