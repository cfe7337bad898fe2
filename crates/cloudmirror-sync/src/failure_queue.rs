//! Failure queue and retry timer
//!
//! Changes that could not be processed wait here until the retry timer hands
//! them back to the change source. The queue and the timer flag share one
//! async mutex; every producer and consumer (orchestrator phases, the timer
//! drain, failed transfer tasks) takes it before touching the queue.
//!
//! ## Flow
//!
//! ```text
//! enqueue ──→ [ queue ] ──(every retry_interval)──→ add_changes_to_processing_queue(front)
//!                 ↑                                              │
//!                 └──────────── rejected items / error ──────────┘
//! ```
//!
//! The timer stops itself once a drain leaves the queue empty and is restarted
//! by the next enqueue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use cloudmirror_core::domain::Change;
use cloudmirror_core::ports::IChangeSource;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Change>,
    timer_running: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    retry_interval: Duration,
    reinjector: Arc<dyn IChangeSource>,
    shutdown: CancellationToken,
}

/// Cloneable handle to the failure queue and its retry timer
///
/// Every clone refers to the same queue. The handle is created once and passed
/// to whoever needs to enqueue failures.
#[derive(Clone)]
pub struct FailureQueueHandle {
    shared: Arc<Shared>,
}

impl FailureQueueHandle {
    /// Creates an empty queue that re-injects through `reinjector`
    pub fn new(reinjector: Arc<dyn IChangeSource>, retry_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                retry_interval,
                reinjector,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Takes the queue lock for a multi-step critical section
    pub async fn lock(&self) -> FailureQueueGuard<'_> {
        FailureQueueGuard {
            handle: self,
            state: self.shared.state.lock().await,
        }
    }

    /// Enqueues one change and makes sure the timer runs
    pub async fn enqueue(&self, change: Change) {
        let mut guard = self.lock().await;
        guard.enqueue(change);
        guard.ensure_timer();
    }

    /// Enqueues every change and (re)starts the timer
    pub async fn enqueue_all_and_restart(&self, changes: impl IntoIterator<Item = Change>) {
        let mut guard = self.lock().await;
        for change in changes {
            guard.enqueue(change);
        }
        guard.ensure_timer();
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copies the current queue contents, front first
    pub async fn snapshot(&self) -> Vec<Change> {
        self.shared.state.lock().await.queue.iter().cloned().collect()
    }

    /// True while the retry timer task is alive
    pub async fn is_timer_running(&self) -> bool {
        self.shared.state.lock().await.timer_running
    }

    /// Starts the timer if it is not running. Idempotent.
    pub async fn start_timer(&self) {
        self.lock().await.ensure_timer();
    }

    /// Stops the timer task; queued changes stay where they are
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    /// Hands changes back to the change source, queueing whatever it refuses
    ///
    /// Returns the number of changes accepted upstream. A source error is
    /// returned after every change has been queued.
    pub async fn reinject(&self, changes: Vec<Change>) -> anyhow::Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }
        let total = changes.len();
        let fallback = changes.clone();

        match self
            .shared
            .reinjector
            .add_changes_to_processing_queue(changes, true)
            .await
        {
            Ok(rejected) => {
                let accepted = total - rejected.len().min(total);
                if !rejected.is_empty() {
                    warn!(
                        rejected = rejected.len(),
                        "Processing queue rejected changes, queueing them for retry"
                    );
                    self.enqueue_all_and_restart(rejected).await;
                }
                Ok(accepted)
            }
            Err(e) => {
                warn!(count = total, error = %e, "Re-injection failed, queueing changes for retry");
                self.enqueue_all_and_restart(fallback).await;
                Err(e)
            }
        }
    }

    /// One timer tick: drain, re-inject, requeue refusals. Returns true to keep ticking.
    async fn drain_once(&self) -> bool {
        let mut guard = self.lock().await;
        let drained = guard.drain_all();
        if drained.is_empty() {
            guard.state.timer_running = false;
            debug!("Failure queue empty, retry timer stopping");
            return false;
        }

        let count = drained.len();
        let fallback = drained.clone();
        // The lock stays held so no run can interleave with the hand-back.
        match self
            .shared
            .reinjector
            .add_changes_to_processing_queue(drained, true)
            .await
        {
            Ok(rejected) if rejected.is_empty() => {
                info!(count, "Retry timer re-injected failed changes");
                guard.state.timer_running = false;
                false
            }
            Ok(rejected) => {
                warn!(
                    count,
                    rejected = rejected.len(),
                    "Retry timer re-injection partially rejected"
                );
                for change in rejected {
                    guard.enqueue(change);
                }
                true
            }
            Err(e) => {
                warn!(count, error = %e, "Retry timer re-injection failed, restoring queue");
                guard.restore(fallback);
                true
            }
        }
    }

    async fn timer_loop(self) {
        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => {
                    self.shared.state.lock().await.timer_running = false;
                    debug!("Retry timer shut down");
                    break;
                }
                _ = tokio::time::sleep(self.shared.retry_interval) => {
                    if !self.drain_once().await {
                        break;
                    }
                }
            }
        }
    }
}

/// Exclusive access to the failure queue
pub struct FailureQueueGuard<'a> {
    handle: &'a FailureQueueHandle,
    state: MutexGuard<'a, QueueState>,
}

impl FailureQueueGuard<'_> {
    /// Appends a change, counting the failure that put it here
    pub fn enqueue(&mut self, mut change: Change) {
        change.record_failure();
        debug!(event_id = %change.event_id(), failures = change.failure_counter(), "Queued failed change");
        self.state.queue.push_back(change);
    }

    /// Empties the queue, front first
    pub fn drain_all(&mut self) -> Vec<Change> {
        self.state.queue.drain(..).collect()
    }

    /// Puts changes back at the front in their original order
    pub fn restore(&mut self, changes: Vec<Change>) {
        for change in changes.into_iter().rev() {
            self.state.queue.push_front(change);
        }
    }

    pub fn len(&self) -> usize {
        self.state.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.queue.is_empty()
    }

    /// Spawns the retry timer unless it is already running
    pub fn ensure_timer(&mut self) {
        if self.state.timer_running || self.handle.shared.shutdown.is_cancelled() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                self.state.timer_running = true;
                runtime.spawn(self.handle.clone().timer_loop());
                debug!(
                    interval_ms = self.handle.shared.retry_interval.as_millis() as u64,
                    "Retry timer started"
                );
            }
            Err(_) => warn!("No async runtime available, retry timer not started"),
        }
    }
}
