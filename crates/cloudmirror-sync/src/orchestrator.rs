//! Sync run orchestrator
//!
//! A [`SyncRunner`] drives one sync run at a time through these phases:
//!
//! ```text
//! setup → grab changes → first local sweep ⟲ released dependents
//!       → cap batch → communicate → merge into index
//!       → resolve dependencies → second local sweep
//!       → checkpoint → start transfers → cleanup
//! ```
//!
//! Every grabbed change starts out in `errors_to_queue` and leaves it only on
//! confirmed success, when a deferred transfer takes ownership of it, or when
//! it is handed to another phase that queues it itself. Cleanup puts whatever
//! is left into the failure queue, so a run never drops a change.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use cloudmirror_core::config::Config;
use cloudmirror_core::domain::{
    Change, ContentStream, Direction, EventId, EventStatus, PendingChange, SyncId,
};
use cloudmirror_core::ports::{
    IChangeSource, IContentUploader, IDependencyResolver, ILocalApplier, IRemoteService,
    ISyncIndex,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::communicate::{CommunicationResult, ReconciledChange, RemoteCommunicationEngine};
use crate::completion::{needs_local_completion, CompletionOutcome, CompletionTask, LocalCompletionEngine};
use crate::error::{AggregateError, SyncError, SyncPhase};
use crate::failure_queue::FailureQueueHandle;
use crate::temp_downloads::TempDownloadRegistry;
use crate::transfers::{TransferOutcome, TransferScheduler};

/// Everything a [`SyncRunner`] talks to
pub struct SyncCollaborators {
    pub change_source: Arc<dyn IChangeSource>,
    pub index: Arc<dyn ISyncIndex>,
    pub resolver: Arc<dyn IDependencyResolver>,
    pub applier: Arc<dyn ILocalApplier>,
    pub remote: Arc<dyn IRemoteService>,
    /// Without an uploader, content uploads stay queued
    pub uploader: Option<Arc<dyn IContentUploader>>,
}

/// What one run did
#[derive(Debug, Default)]
pub struct RunReport {
    /// `None` when the run collected no errors
    pub error: Option<AggregateError>,
    pub new_sync_id: Option<SyncId>,
    /// Sorted, without duplicates
    pub successful_event_ids: Vec<EventId>,
    /// Changes sent to the remote service
    pub communicated: usize,
    /// Transfers started and not awaited
    pub deferred: usize,
    /// Changes put into the failure queue at cleanup
    pub requeued: usize,
    /// Changes handed back to the change source
    pub reinjected: usize,
    /// Transfers from earlier runs that finished since the last run; their
    /// failures are in `error`
    pub transfer_outcomes: Vec<TransferOutcome>,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Bookkeeping for one run
#[derive(Default)]
struct RunState {
    aggregate: AggregateError,
    successful: Vec<EventId>,
    errors_to_queue: Vec<PendingChange>,
    pending_dependents: Vec<Change>,
    tasks: Vec<CompletionTask>,
    communicated: usize,
    deferred: usize,
    reinjected: usize,
}

impl RunState {
    fn phase(&mut self, phase: SyncPhase) {
        debug!(phase = %phase, "Sync run phase");
        self.aggregate.set_phase(phase);
    }

    /// Drops the first baseline entry for this exact change and stream
    fn take_entry(&mut self, change: &Change, stream: Option<&ContentStream>) -> Option<PendingChange> {
        let probe = PendingChange::new(change.clone(), stream.cloned());
        let pos = self
            .errors_to_queue
            .iter()
            .position(|entry| entry.matches(&probe) && entry.change.change() == change)?;
        Some(self.errors_to_queue.remove(pos))
    }

    fn sorted_successes(&mut self) -> &[EventId] {
        self.successful.sort_unstable();
        self.successful.dedup();
        &self.successful
    }
}

/// Runs sync passes, one at a time
pub struct SyncRunner {
    sync_root: PathBuf,
    max_batch: usize,
    change_source: Arc<dyn IChangeSource>,
    index: Arc<dyn ISyncIndex>,
    resolver: Arc<dyn IDependencyResolver>,
    completion: LocalCompletionEngine,
    communication: RemoteCommunicationEngine,
    transfers: TransferScheduler,
    failure_queue: FailureQueueHandle,
    temp_downloads: Arc<TempDownloadRegistry>,
    run_lock: Mutex<()>,
}

impl SyncRunner {
    pub fn new(collaborators: SyncCollaborators, config: &Config) -> Self {
        let SyncCollaborators {
            change_source,
            index,
            resolver,
            applier,
            remote,
            uploader,
        } = collaborators;

        let failure_queue =
            FailureQueueHandle::new(Arc::clone(&change_source), config.sync.retry_interval());
        let temp_downloads = Arc::new(TempDownloadRegistry::new(&config.sync.temp_download_dir));
        let completion = LocalCompletionEngine::new(
            applier,
            Arc::clone(&remote),
            uploader,
            Arc::clone(&temp_downloads),
            failure_queue.clone(),
        );

        info!(
            root = %config.sync.root.display(),
            max_batch = config.sync.max_sync_to_batch,
            "Creating sync runner"
        );

        Self {
            sync_root: config.sync.root.clone(),
            max_batch: config.sync.max_sync_to_batch.max(1),
            change_source,
            transfers: TransferScheduler::new(&config.transfers, Arc::clone(&index)),
            index,
            resolver,
            completion,
            communication: RemoteCommunicationEngine::new(remote, config.sync.root.clone()),
            failure_queue,
            temp_downloads,
            run_lock: Mutex::new(()),
        }
    }

    pub fn failure_queue(&self) -> &FailureQueueHandle {
        &self.failure_queue
    }

    pub fn transfers(&self) -> &TransferScheduler {
        &self.transfers
    }

    pub fn temp_downloads(&self) -> &TempDownloadRegistry {
        &self.temp_downloads
    }

    /// Stops the retry timer; queued changes are kept
    pub fn shutdown(&self) {
        self.failure_queue.shutdown();
    }

    /// Runs one sync pass
    ///
    /// Never fails: every problem is collected into [`RunReport::error`].
    /// Concurrent callers wait for the run in progress to finish.
    pub async fn run(&self, respond_to_push: bool) -> RunReport {
        let _single_flight = self.run_lock.lock().await;
        let mut transfer_outcomes = self.transfers.drain_outcomes();
        let mut state = RunState::default();
        for outcome in &mut transfer_outcomes {
            if let Some(error) = outcome.take_error() {
                state.aggregate.push(error);
            }
        }

        let new_sync_id = match self.run_phases(respond_to_push, &mut state).await {
            Ok(id) => id,
            Err(e) => {
                state.aggregate.push(e);
                None
            }
        };
        let requeued = self.cleanup(&mut state).await;

        let mut aggregate = state.aggregate;
        aggregate.dispose_streams();
        let error = if aggregate.has_errors() {
            error!(phase = %aggregate.phase(), "{aggregate}");
            Some(aggregate)
        } else {
            None
        };

        RunReport {
            error,
            new_sync_id,
            successful_event_ids: state.successful,
            communicated: state.communicated,
            deferred: state.deferred,
            requeued,
            reinjected: state.reinjected,
            transfer_outcomes,
        }
    }

    async fn run_phases(
        &self,
        respond_to_push: bool,
        state: &mut RunState,
    ) -> Result<Option<SyncId>, SyncError> {
        self.setup(state);

        let output_changes = self.grab_changes(state).await?;
        let batch = self.first_sweep(output_changes, state).await;
        let batch = self.cap_batch(batch, state).await;

        let Some(result) = self.communicate(batch, respond_to_push, state).await? else {
            return Ok(None);
        };
        let Some(new_sync_id) = result.new_sync_id.clone() else {
            self.collect_unsent(result, state);
            return Ok(None);
        };

        let (incomplete, errors) = self.merge_into_index(result, state).await;
        let output = self.resolve_dependencies(incomplete, errors, state).await?;
        self.second_sweep(output, state).await;
        self.checkpoint(&new_sync_id, state).await;
        self.start_transfers(state);

        Ok(Some(new_sync_id))
    }

    // ========================================================================
    // Phases
    // ========================================================================

    fn setup(&self, state: &mut RunState) {
        state.phase(SyncPhase::Setup);
        if let Err(e) = self.temp_downloads.ensure_initialized() {
            warn!(dir = %self.temp_downloads.dir().display(), error = %e, "Staging directory unavailable");
            state.aggregate.push(SyncError::Io(e));
        }
    }

    #[tracing::instrument(skip(self, state))]
    async fn grab_changes(&self, state: &mut RunState) -> Result<Vec<PendingChange>, SyncError> {
        state.phase(SyncPhase::GrabChanges);

        let initial_failures = self.failure_queue.lock().await.drain_all();
        let backup = initial_failures.clone();

        let grabbed = match self.change_source.grab_changes(initial_failures).await {
            Ok(grabbed) => grabbed,
            Err(e) => {
                let mut guard = self.failure_queue.lock().await;
                guard.restore(backup);
                if !guard.is_empty() {
                    guard.ensure_timer();
                }
                return Err(SyncError::ChangeSource(e));
            }
        };

        info!(
            output = grabbed.output_changes.len(),
            in_error = grabbed.changes_in_error.len(),
            "Grabbed changes"
        );
        state.errors_to_queue.extend(grabbed.output_changes.iter().cloned());
        state.errors_to_queue.extend(
            grabbed
                .changes_in_error
                .into_iter()
                .map(|change| PendingChange::new(change, None)),
        );
        Ok(grabbed.output_changes)
    }

    /// Completes changes the server already knows, until no new dependents are released
    #[tracing::instrument(skip(self, to_process, state), fields(count = to_process.len()))]
    async fn first_sweep(
        &self,
        mut to_process: Vec<PendingChange>,
        state: &mut RunState,
    ) -> Vec<PendingChange> {
        state.phase(SyncPhase::FirstSweep);
        let mut processed = HashSet::new();
        let mut handled = Vec::new();

        loop {
            let released = self
                .sweep(&to_process, &mut processed, &mut handled, true, state)
                .await;
            let mut merged = false;
            for dependent in released {
                if dependent.is_upload_without_stream(None) {
                    state.pending_dependents.push(dependent);
                } else {
                    let pending = PendingChange::new(dependent, None);
                    state.errors_to_queue.push(pending.clone());
                    to_process.push(pending);
                    merged = true;
                }
            }
            if !merged {
                break;
            }
        }

        to_process
            .into_iter()
            .filter(|p| !handled.iter().any(|h| h.matches(p) && h.change == p.change))
            .collect()
    }

    /// Hands the part of the batch beyond the cap back to the change source
    #[tracing::instrument(skip(self, batch, state), fields(count = batch.len()))]
    async fn cap_batch(&self, mut batch: Vec<PendingChange>, state: &mut RunState) -> Vec<PendingChange> {
        state.phase(SyncPhase::CapBatch);
        if batch.len() <= self.max_batch {
            return batch;
        }

        let excess = batch.split_off(self.max_batch);
        info!(sent = batch.len(), deferred = excess.len(), "Batch capped");

        let mut changes = Vec::new();
        for pending in excess {
            state.take_entry(pending.change.change(), pending.stream.as_ref());
            if let Some(stream) = pending.stream {
                state.aggregate.dispose_later(stream);
            }
            changes.extend(pending.change.into_flattened());
        }
        match self.failure_queue.reinject(changes).await {
            Ok(accepted) => state.reinjected += accepted,
            Err(e) => state.aggregate.push(SyncError::Reinject(e)),
        }
        batch
    }

    #[tracing::instrument(skip(self, batch, state), fields(count = batch.len()))]
    async fn communicate(
        &self,
        batch: Vec<PendingChange>,
        respond_to_push: bool,
        state: &mut RunState,
    ) -> Result<Option<CommunicationResult>, SyncError> {
        state.phase(SyncPhase::Communicate);
        if batch.is_empty() && !respond_to_push {
            debug!("Nothing to communicate");
            return Ok(None);
        }

        let last_sync_id = self.index.last_sync_id().await.map_err(SyncError::Index)?;
        state.communicated = batch.len();

        match self
            .communication
            .communicate(batch, respond_to_push, last_sync_id.as_ref())
            .await
        {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                warn!(error = %e, "Communication failed, batch stays queued");
                state.aggregate.push(e);
                Ok(None)
            }
        }
    }

    /// Nothing was sent; error entries stay in the baseline
    fn collect_unsent(&self, result: CommunicationResult, state: &mut RunState) {
        state.aggregate.extend(result.stray_errors);
        for mut entry in result.errors {
            if let Some(error) = entry.error.take() {
                state.aggregate.push(error);
            }
        }
    }

    /// Records completions and writes the server's view into the index
    #[tracing::instrument(skip(self, result, state), fields(count = result.total()))]
    async fn merge_into_index(
        &self,
        result: CommunicationResult,
        state: &mut RunState,
    ) -> (Vec<ReconciledChange>, Vec<ReconciledChange>) {
        state.phase(SyncPhase::MergeIndex);
        state.aggregate.extend(result.stray_errors);

        for mut done in result.completed {
            state.successful.push(done.event_id());
            if let Some(original) = &done.original {
                state.take_entry(original, done.stream.as_ref());
            }
            if done.needs_index_update {
                if let Err(e) = self.index.merge_to_sql(done.change.change(), None).await {
                    state.aggregate.push(SyncError::Index(e));
                }
            }
            state.pending_dependents.extend(done.change.take_dependencies());
        }

        for entry in &result.incomplete {
            if entry.needs_index_update {
                if let Err(e) = self.index.merge_to_sql(entry.change.change(), None).await {
                    state.aggregate.push(SyncError::Index(e));
                }
            }
        }

        let mut errors = result.errors;
        for entry in &mut errors {
            if entry.needs_index_update {
                let merged = match (&entry.original, entry.status) {
                    (Some(original), Some(EventStatus::Conflict)) => {
                        self.index
                            .merge_to_sql(original, Some(entry.change.change()))
                            .await
                    }
                    _ => self.index.merge_to_sql(entry.change.change(), None).await,
                };
                if let Err(e) = merged {
                    state.aggregate.push(SyncError::Index(e));
                }
            }
            if let Some(error) = entry.error.take() {
                state.aggregate.push(error);
            }
            if let Some(stream) = &entry.stream {
                state.aggregate.dispose_later(stream.clone());
            }
        }

        (result.incomplete, errors)
    }

    /// Re-partitions everything still open, under the failure queue lock
    #[tracing::instrument(skip_all, fields(incomplete = incomplete.len(), errors = errors.len()))]
    async fn resolve_dependencies(
        &self,
        incomplete: Vec<ReconciledChange>,
        errors: Vec<ReconciledChange>,
        state: &mut RunState,
    ) -> Result<Vec<PendingChange>, SyncError> {
        state.phase(SyncPhase::ResolveDependencies);
        let mut guard = self.failure_queue.lock().await;
        let snapshot = guard.drain_all();

        let mut pending = Vec::with_capacity(incomplete.len());
        for entry in incomplete {
            if let Some(original) = &entry.original {
                state.take_entry(original, entry.stream.as_ref());
            }
            pending.push(PendingChange {
                change: entry.change,
                stream: entry.stream,
            });
        }
        let (held, rest): (Vec<Change>, Vec<Change>) = std::mem::take(&mut state.pending_dependents)
            .into_iter()
            .partition(|c| c.is_upload_without_stream(None));
        state.pending_dependents = rest;
        pending.extend(held.into_iter().map(|c| PendingChange::new(c, None)));

        let mut failed = snapshot.clone();
        let mut error_changes = Vec::new();
        for entry in errors {
            if let Some(original) = &entry.original {
                state.take_entry(original, entry.stream.as_ref());
            } else {
                state.take_entry(entry.change.change(), entry.stream.as_ref());
            }
            let (change, _stream) = entry.into_requeue();
            error_changes.extend(change.into_flattened());
        }
        failed.extend(error_changes.iter().cloned());

        let input_streams: Vec<ContentStream> =
            pending.iter().filter_map(|p| p.stream.clone()).collect();
        let pending_backup = pending.clone();

        let mut assignment = self.resolver.assign_dependencies(pending, failed).await;

        if assignment.is_fatal() {
            guard.restore(snapshot);
            if !guard.is_empty() {
                guard.ensure_timer();
            }
            state.errors_to_queue.extend(pending_backup);
            state
                .errors_to_queue
                .extend(error_changes.into_iter().map(|c| PendingChange::new(c, None)));
            let error = assignment
                .error
                .take()
                .unwrap_or_else(|| anyhow::anyhow!("resolver returned no partition"));
            return Err(SyncError::ResolverFatal(error));
        }
        if let Some(error) = assignment.error.take() {
            warn!(error = %error, "Resolver reported an error alongside its partition");
            state.aggregate.push(SyncError::Resolver(error));
        }

        if !assignment.top_level_errors.is_empty() {
            info!(count = assignment.top_level_errors.len(), "Resolver errors go to the failure queue");
            for change in assignment.top_level_errors {
                guard.enqueue(change);
            }
            guard.ensure_timer();
        }
        drop(guard);

        let mut output = Vec::with_capacity(assignment.top_level.len());
        for pending in assignment.top_level {
            if pending
                .change
                .change()
                .is_upload_without_stream(pending.stream.as_ref())
            {
                state.pending_dependents.extend(pending.change.into_flattened());
            } else {
                state.errors_to_queue.push(pending.clone());
                output.push(pending);
            }
        }

        for stream in input_streams {
            let kept = output
                .iter()
                .any(|p| p.stream.as_ref().is_some_and(|s| s.ptr_eq(&stream)));
            if !kept {
                state.aggregate.dispose_later(stream);
            }
        }

        Ok(output)
    }

    #[tracing::instrument(skip(self, output, state), fields(count = output.len()))]
    async fn second_sweep(&self, output: Vec<PendingChange>, state: &mut RunState) {
        state.phase(SyncPhase::SecondSweep);
        let mut processed = HashSet::new();
        let released = self
            .sweep(&output, &mut processed, &mut Vec::new(), false, state)
            .await;
        state.pending_dependents.extend(released);
    }

    #[tracing::instrument(skip(self, state))]
    async fn checkpoint(&self, new_sync_id: &SyncId, state: &mut RunState) {
        state.phase(SyncPhase::Checkpoint);
        let successes = state.sorted_successes().to_vec();
        if let Err(e) = self
            .index
            .complete_sync_sql(new_sync_id, &successes, &self.sync_root)
            .await
        {
            state.aggregate.push(SyncError::Index(e));
            return;
        }
        info!(sync_id = %new_sync_id, successes = successes.len(), "Sync checkpoint recorded");
    }

    fn start_transfers(&self, state: &mut RunState) {
        state.phase(SyncPhase::StartTransfers);
        for task in state.tasks.drain(..) {
            debug!(event_id = %task.event_id, direction = %task.direction, "Starting transfer");
            self.transfers.spawn(task);
            state.deferred += 1;
        }
    }

    /// Settles everything still open. Returns how many changes were queued.
    async fn cleanup(&self, state: &mut RunState) -> usize {
        for task in state.tasks.drain(..) {
            self.transfers.spawn(task);
            state.deferred += 1;
        }

        let dependents = std::mem::take(&mut state.pending_dependents);
        if !dependents.is_empty() {
            let count = dependents.len();
            match self.failure_queue.reinject(dependents).await {
                Ok(accepted) => {
                    debug!(count, accepted, "Dependents handed back to the change source");
                    state.reinjected += accepted;
                }
                Err(e) => state.aggregate.push(SyncError::Reinject(e)),
            }
        }

        state.sorted_successes();
        let mut requeue = Vec::new();
        for pending in std::mem::take(&mut state.errors_to_queue) {
            let id = pending.event_id();
            if id.is_assigned() && state.successful.binary_search(&id).is_ok() {
                continue;
            }
            if let Some(stream) = pending.stream {
                state.aggregate.dispose_later(stream);
            }
            requeue.extend(pending.change.into_flattened());
        }

        let count = requeue.len();
        if count > 0 {
            info!(count, "Queueing unfinished changes for retry");
            self.failure_queue.enqueue_all_and_restart(requeue).await;
        }
        count
    }

    // ========================================================================
    // Sweeps
    // ========================================================================

    /// One local completion pass; returns dependents of synchronous successes
    ///
    /// Every entry handed to the completion engine is recorded in `handled`.
    async fn sweep(
        &self,
        items: &[PendingChange],
        processed: &mut HashSet<EventId>,
        handled: &mut Vec<PendingChange>,
        known_to_server_only: bool,
        state: &mut RunState,
    ) -> Vec<Change> {
        let mut released = Vec::new();

        for pending in items {
            let change = pending.change.change();
            let event_id = change.event_id();
            if !event_id.is_assigned() || processed.contains(&event_id) {
                continue;
            }
            if known_to_server_only
                && !(change.has_storage_key() || change.direction() == Direction::FromRemote)
            {
                continue;
            }
            if !needs_local_completion(change)
                || change.is_upload_without_stream(pending.stream.as_ref())
            {
                continue;
            }
            processed.insert(event_id);
            handled.push(pending.clone());

            match self.completion.complete(pending).await {
                CompletionOutcome::Succeeded(id) => {
                    state.successful.push(id);
                    state.take_entry(change, pending.stream.as_ref());
                    released.extend(pending.change.dependencies().iter().cloned());
                }
                CompletionOutcome::Deferred(task) => {
                    state.take_entry(change, pending.stream.as_ref());
                    state.tasks.push(task);
                }
                CompletionOutcome::Failed(e) => {
                    warn!(event_id = %event_id, error = %e, "Local completion failed");
                    state.aggregate.push(e);
                }
            }
        }

        released
    }
}
