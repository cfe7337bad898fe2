//! In-memory collaborators for sync run tests
//!
//! Each mock records what the runner asked of it. `MockRemote` echoes every
//! sent event back with a status (default `accepted`), so reconstructed changes
//! carry the same metadata as the originals unless a test says otherwise.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cloudmirror_core::config::{Config, ConfigBuilder};
use cloudmirror_core::domain::{
    Change, ChangeMetadata, ChangeType, ContentStream, Direction, EventId, PendingChange, SyncId,
};
use cloudmirror_core::ports::{
    DependencyAssignment, GrabbedChanges, IChangeSource, IDependencyResolver, ILocalApplier,
    IRemoteService, ISyncIndex, RemoteEvent, SyncFromRequest, SyncResponse, SyncToRequest,
};
use cloudmirror_sync::{ParentPathResolver, SyncCollaborators, SyncRunner};
use tempfile::TempDir;

pub const ROOT: &str = "/sync/root";
pub const HASH: &str = "5d41402abc4b2a76b9719d911017c592";

// ============================================================================
// Change source
// ============================================================================

/// Upstream processing queue; re-injected changes come back on the next grab
#[derive(Default)]
pub struct MockChangeSource {
    pub upstream: Mutex<VecDeque<PendingChange>>,
    /// Changes the source failed to build, returned once by the next grab
    pub in_error: Mutex<Vec<Change>>,
    pub reinjected: Mutex<Vec<(Vec<Change>, bool)>>,
    pub fail_grab: AtomicBool,
    pub reject_reinjection: AtomicBool,
}

impl MockChangeSource {
    pub fn push(&self, pending: PendingChange) {
        self.upstream.lock().unwrap().push_back(pending);
    }

    pub fn reinjected_ids(&self) -> Vec<i64> {
        self.reinjected
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(batch, _)| batch.iter().map(|c| c.event_id().value()))
            .collect()
    }
}

#[async_trait::async_trait]
impl IChangeSource for MockChangeSource {
    async fn grab_changes(&self, initial_failures: Vec<Change>) -> anyhow::Result<GrabbedChanges> {
        if self.fail_grab.load(Ordering::SeqCst) {
            anyhow::bail!("monitor offline");
        }
        let mut upstream = self.upstream.lock().unwrap();
        for change in initial_failures {
            upstream.push_back(PendingChange::new(change, None));
        }
        Ok(GrabbedChanges {
            output_changes: upstream.drain(..).collect(),
            changes_in_error: std::mem::take(&mut *self.in_error.lock().unwrap()),
        })
    }

    async fn add_changes_to_processing_queue(
        &self,
        changes: Vec<Change>,
        insert_at_front: bool,
    ) -> anyhow::Result<Vec<Change>> {
        self.reinjected
            .lock()
            .unwrap()
            .push((changes.clone(), insert_at_front));
        if self.reject_reinjection.load(Ordering::SeqCst) {
            return Ok(changes);
        }
        let mut upstream = self.upstream.lock().unwrap();
        for change in changes.into_iter().rev() {
            upstream.push_front(PendingChange::new(change, None));
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Index
// ============================================================================

#[derive(Default)]
pub struct MockIndex {
    pub merges: Mutex<Vec<(Change, Option<Change>)>>,
    pub checkpoints: Mutex<Vec<(SyncId, Vec<EventId>)>>,
    pub completed_events: Mutex<Vec<EventId>>,
}

#[async_trait::async_trait]
impl ISyncIndex for MockIndex {
    async fn merge_to_sql(&self, change: &Change, conflict: Option<&Change>) -> anyhow::Result<()> {
        self.merges
            .lock()
            .unwrap()
            .push((change.clone(), conflict.cloned()));
        Ok(())
    }

    async fn complete_sync_sql(
        &self,
        new_sync_id: &SyncId,
        successful_event_ids: &[EventId],
        _sync_root: &Path,
    ) -> anyhow::Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .push((new_sync_id.clone(), successful_event_ids.to_vec()));
        Ok(())
    }

    async fn last_sync_id(&self) -> anyhow::Result<Option<SyncId>> {
        Ok(self.checkpoints.lock().unwrap().last().map(|(id, _)| id.clone()))
    }

    async fn complete_single_event(&self, event_id: EventId) -> anyhow::Result<()> {
        self.completed_events.lock().unwrap().push(event_id);
        Ok(())
    }
}

// ============================================================================
// Remote service
// ============================================================================

#[derive(Default)]
pub struct MockRemote {
    pub statuses: Mutex<HashMap<i64, String>>,
    pub pull_events: Mutex<Vec<RemoteEvent>>,
    pub download_content: Mutex<Option<Vec<u8>>>,
    pub fail_sync_to: AtomicBool,
    pub sync_to_calls: Mutex<Vec<SyncToRequest>>,
    pub sync_from_calls: Mutex<Vec<SyncFromRequest>>,
    rounds: AtomicUsize,
}

impl MockRemote {
    pub fn answer(&self, event_id: i64, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(event_id, status.to_string());
    }

    pub fn sent_ids(&self) -> Vec<i64> {
        self.sync_to_calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|r| r.events.iter().map(|e| e.header.event_id))
            .collect()
    }

    fn next_sync_id(&self) -> String {
        format!("s-{}", self.rounds.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait::async_trait]
impl IRemoteService for MockRemote {
    async fn sync_to(&self, request: &SyncToRequest) -> anyhow::Result<SyncResponse> {
        self.sync_to_calls.lock().unwrap().push(request.clone());
        if self.fail_sync_to.load(Ordering::SeqCst) {
            anyhow::bail!("/sync/to returned HTTP 503: maintenance");
        }
        let statuses = self.statuses.lock().unwrap();
        let events = request
            .events
            .iter()
            .map(|event| {
                let mut echoed = event.clone();
                let status = statuses
                    .get(&event.header.event_id)
                    .cloned()
                    .unwrap_or_else(|| "accepted".to_string());
                echoed.header.status = Some(status);
                echoed
            })
            .collect();
        Ok(SyncResponse {
            sync_id: self.next_sync_id(),
            events,
        })
    }

    async fn sync_from(&self, request: &SyncFromRequest) -> anyhow::Result<SyncResponse> {
        self.sync_from_calls.lock().unwrap().push(request.clone());
        Ok(SyncResponse {
            sync_id: self.next_sync_id(),
            events: self.pull_events.lock().unwrap().clone(),
        })
    }

    async fn download(&self, storage_key: &str) -> anyhow::Result<Vec<u8>> {
        self.download_content
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("/sync/download returned HTTP 404: {storage_key}"))
    }
}

// ============================================================================
// Applier and resolvers
// ============================================================================

#[derive(Default)]
pub struct MockApplier {
    pub applied: Mutex<Vec<Change>>,
}

#[async_trait::async_trait]
impl ILocalApplier for MockApplier {
    async fn apply_sync_from_change(&self, change: &Change) -> anyhow::Result<()> {
        self.applied.lock().unwrap().push(change.clone());
        Ok(())
    }
}

/// Resolver that always fails without a partition
pub struct FatalResolver;

#[async_trait::async_trait]
impl IDependencyResolver for FatalResolver {
    async fn assign_dependencies(
        &self,
        _pending: Vec<PendingChange>,
        _failed: Vec<Change>,
    ) -> DependencyAssignment {
        DependencyAssignment {
            error: Some(anyhow::anyhow!("resolver crashed")),
            ..DependencyAssignment::default()
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub runner: SyncRunner,
    pub source: Arc<MockChangeSource>,
    pub index: Arc<MockIndex>,
    pub remote: Arc<MockRemote>,
    pub applier: Arc<MockApplier>,
    _staging: TempDir,
}

pub fn config(staging: &TempDir, max_batch: usize) -> Config {
    ConfigBuilder::new()
        .sync_root(PathBuf::from(ROOT))
        .sync_temp_download_dir(staging.path().join("downloads"))
        .sync_max_sync_to_batch(max_batch)
        .sync_retry_interval_secs(3600)
        .build()
}

pub fn harness(max_batch: usize) -> Harness {
    harness_with_resolver(max_batch, Arc::new(ParentPathResolver::new()))
}

pub fn harness_with_resolver(max_batch: usize, resolver: Arc<dyn IDependencyResolver>) -> Harness {
    let staging = TempDir::new().unwrap();
    let source = Arc::new(MockChangeSource::default());
    let index = Arc::new(MockIndex::default());
    let remote = Arc::new(MockRemote::default());
    let applier = Arc::new(MockApplier::default());

    let runner = SyncRunner::new(
        SyncCollaborators {
            change_source: source.clone(),
            index: index.clone(),
            resolver,
            applier: applier.clone(),
            remote: remote.clone(),
            uploader: None,
        },
        &config(&staging, max_batch),
    );

    Harness {
        runner,
        source,
        index,
        remote,
        applier,
        _staging: staging,
    }
}

// ============================================================================
// Changes
// ============================================================================

pub fn path(relative: &str) -> PathBuf {
    Path::new(ROOT).join(relative)
}

/// A local file creation ready to be sent
pub fn local_file(id: i64, relative: &str) -> Change {
    let mut metadata = ChangeMetadata::file(5);
    metadata.hash = Some(HASH.to_string());
    Change::new(Direction::ToRemote, ChangeType::Created, path(relative))
        .with_event_id(id)
        .with_metadata(metadata)
}

pub fn local_folder(id: i64, relative: &str) -> Change {
    Change::new(Direction::ToRemote, ChangeType::Created, path(relative))
        .with_event_id(id)
        .with_metadata(ChangeMetadata::folder())
}

pub fn local_delete(id: i64, relative: &str) -> Change {
    Change::new(Direction::ToRemote, ChangeType::Deleted, path(relative))
        .with_event_id(id)
        .with_metadata(ChangeMetadata::file(0))
}

/// A folder the server created, applied locally without a download
pub fn server_folder(id: i64, relative: &str) -> Change {
    Change::new(Direction::FromRemote, ChangeType::Created, path(relative))
        .with_event_id(id)
        .with_metadata(ChangeMetadata::folder())
}

pub fn with_stream(change: Change) -> (PendingChange, ContentStream) {
    let stream = ContentStream::from_bytes(b"hello".to_vec());
    (PendingChange::new(change, Some(stream.clone())), stream)
}

pub async fn queued_ids(runner: &SyncRunner) -> Vec<i64> {
    let mut ids: Vec<i64> = runner
        .failure_queue()
        .snapshot()
        .await
        .iter()
        .map(|c| c.event_id().value())
        .collect();
    ids.sort_unstable();
    ids
}

pub fn ids(events: &[EventId]) -> Vec<i64> {
    events.iter().map(|e| e.value()).collect()
}
