//! Remote communication engine
//!
//! Sends one capped batch to the remote service and sorts the answer into
//! three buckets:
//!
//! | Server status                     | Bucket     |
//! |-----------------------------------|------------|
//! | accepted, exists, duplicate       | completed  |
//! | upload, uploading                 | incomplete |
//! | conflict                          | errors     |
//! | missing (server-originated event) | incomplete |
//!
//! Every change that was sent lands in exactly one bucket. Anything the server
//! leaves out is added to the error bucket as unmatched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloudmirror_core::domain::{
    metadata_differs, relative_to_root, Change, ChangeMetadata, ChangeType,
    ChangeWithDependencies, ContentStream, Direction, EventId, EventStatus, ItemKind,
    PendingChange, SyncAction, SyncId,
};
use cloudmirror_core::ports::{
    EventHeader, EventMetadata, IRemoteService, RemoteEvent, SyncFromRequest, SyncToRequest,
    WIRE_VERSION,
};
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// One change after reconciliation against the server's answer
#[derive(Debug)]
pub struct ReconciledChange {
    /// The change as the server now describes it, with the original dependents
    pub change: ChangeWithDependencies,
    /// The change that was sent, when the server event matched one
    pub original: Option<Change>,
    pub stream: Option<ContentStream>,
    /// Whether the local index must record the server's version
    pub needs_index_update: bool,
    pub status: Option<EventStatus>,
    pub error: Option<SyncError>,
}

impl ReconciledChange {
    fn unmatched(pending: PendingChange, error: SyncError) -> Self {
        Self {
            change: pending.change,
            original: None,
            stream: pending.stream,
            needs_index_update: false,
            status: None,
            error: Some(error),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.change.event_id()
    }

    /// The change to put back into circulation, with its dependents
    ///
    /// The local original wins over the server's version so a retry resends
    /// what the user did.
    pub fn into_requeue(self) -> (ChangeWithDependencies, Option<ContentStream>) {
        let (server_version, dependents) = self.change.into_parts();
        let change = self.original.unwrap_or(server_version);
        (
            ChangeWithDependencies::with_dependencies(change, dependents),
            self.stream,
        )
    }
}

/// Outcome of one communication round
#[derive(Debug, Default)]
pub struct CommunicationResult {
    /// `None` when nothing was sent
    pub new_sync_id: Option<SyncId>,
    pub completed: Vec<ReconciledChange>,
    pub incomplete: Vec<ReconciledChange>,
    pub errors: Vec<ReconciledChange>,
    /// Problems with the response that belong to no sent change
    pub stray_errors: Vec<SyncError>,
}

impl CommunicationResult {
    pub fn total(&self) -> usize {
        self.completed.len() + self.incomplete.len() + self.errors.len()
    }
}

pub struct RemoteCommunicationEngine {
    remote: Arc<dyn IRemoteService>,
    sync_root: PathBuf,
}

impl RemoteCommunicationEngine {
    pub fn new(remote: Arc<dyn IRemoteService>, sync_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            sync_root: sync_root.into(),
        }
    }

    pub fn sync_root(&self) -> &Path {
        &self.sync_root
    }

    /// Exchanges one batch with the remote service
    ///
    /// # Errors
    /// Returns `SyncError::Transport` when the call fails or the response
    /// carries no usable sync id. The caller keeps the whole batch queued.
    #[tracing::instrument(skip(self, batch, last_sync_id), fields(count = batch.len()))]
    pub async fn communicate(
        &self,
        batch: Vec<PendingChange>,
        respond_to_push: bool,
        last_sync_id: Option<&SyncId>,
    ) -> Result<CommunicationResult, SyncError> {
        if batch.is_empty() {
            if respond_to_push {
                return self.pull(last_sync_id).await;
            }
            debug!("Nothing to send and no push to answer");
            return Ok(CommunicationResult::default());
        }

        let mut result = CommunicationResult::default();
        let last_event_id = batch
            .iter()
            .map(|p| p.event_id().value())
            .max()
            .unwrap_or_default();

        let mut sent: Vec<Option<PendingChange>> = Vec::with_capacity(batch.len());
        let mut by_event_id: HashMap<EventId, usize> = HashMap::new();
        let mut events = Vec::with_capacity(batch.len());

        for pending in batch {
            match self.to_remote_event(pending.change.change(), last_event_id) {
                Ok(event) => {
                    events.push(event);
                    by_event_id.entry(pending.event_id()).or_insert(sent.len());
                    sent.push(Some(pending));
                }
                Err(error) => {
                    warn!(event_id = %pending.event_id(), error = %error, "Change cannot be sent");
                    result.errors.push(ReconciledChange::unmatched(pending, error));
                }
            }
        }

        if events.is_empty() {
            return Ok(result);
        }

        let request = SyncToRequest {
            sync_id: last_sync_id.map(|id| id.as_str().to_string()),
            events,
        };
        let response = self
            .remote
            .sync_to(&request)
            .await
            .map_err(SyncError::Transport)?;
        result.new_sync_id = Some(parse_sync_id(&response.sync_id)?);

        for event in response.events {
            self.reconcile(event, &mut sent, &by_event_id, &mut result);
        }

        for pending in sent.into_iter().flatten() {
            let change = pending.change.change();
            warn!(event_id = %change.event_id(), "Server response left out a sent change");
            let error = SyncError::Unmatched {
                event_id: change.event_id(),
                path: change.new_path().to_path_buf(),
            };
            result.errors.push(ReconciledChange::unmatched(pending, error));
        }

        info!(
            completed = result.completed.len(),
            incomplete = result.incomplete.len(),
            errors = result.errors.len(),
            "Batch reconciled"
        );
        Ok(result)
    }

    async fn pull(&self, last_sync_id: Option<&SyncId>) -> Result<CommunicationResult, SyncError> {
        let request = SyncFromRequest {
            last_sync_id: last_sync_id.map(|id| id.as_str().to_string()),
        };
        let response = self
            .remote
            .sync_from(&request)
            .await
            .map_err(SyncError::Transport)?;

        let mut result = CommunicationResult {
            new_sync_id: Some(parse_sync_id(&response.sync_id)?),
            ..CommunicationResult::default()
        };
        for event in response.events {
            match self.change_from_event(&event, Direction::FromRemote) {
                Ok(change) => result.incomplete.push(server_originated(change)),
                Err(error) => result.stray_errors.push(error),
            }
        }
        info!(count = result.incomplete.len(), "Pulled server changes");
        Ok(result)
    }

    fn reconcile(
        &self,
        event: RemoteEvent,
        sent: &mut [Option<PendingChange>],
        by_event_id: &HashMap<EventId, usize>,
        result: &mut CommunicationResult,
    ) {
        let event_id = EventId::new(event.header.event_id);
        let status = match EventStatus::parse_header(event.header.status.as_deref()) {
            Ok(status) => status,
            Err(e) => {
                let error = SyncError::ContractViolation(format!(
                    "event {event_id} came back with {e}"
                ));
                match take_sent(sent, by_event_id, event_id) {
                    Some(pending) => result.errors.push(ReconciledChange::unmatched(pending, error)),
                    None => result.stray_errors.push(error),
                }
                return;
            }
        };

        let Some(status) = status else {
            match self.change_from_event(&event, Direction::FromRemote) {
                Ok(change) => result.incomplete.push(server_originated(change)),
                Err(error) => result.stray_errors.push(error),
            }
            return;
        };

        let Some(pending) = take_sent(sent, by_event_id, event_id) else {
            result.stray_errors.push(SyncError::ContractViolation(format!(
                "server answered {status} for event {event_id}, which was not sent"
            )));
            return;
        };

        let mut server_version = match self.change_from_event(&event, Direction::ToRemote) {
            Ok(change) => change,
            Err(error) => {
                result.errors.push(ReconciledChange::unmatched(pending, error));
                return;
            }
        };

        let PendingChange { change, stream } = pending;
        let (original, dependents) = change.into_parts();
        server_version = carry_local_fields(server_version, &original);
        let needs_index_update = metadata_differs(&server_version, &original);

        let mut reconciled = ReconciledChange {
            change: ChangeWithDependencies::with_dependencies(server_version, dependents),
            original: Some(original),
            stream,
            needs_index_update,
            status: Some(status),
            error: None,
        };

        if status.is_complete() {
            if let Some(stream) = &reconciled.stream {
                stream.dispose();
            }
            result.completed.push(reconciled);
        } else if status.is_pending_transfer() {
            result.incomplete.push(reconciled);
        } else {
            reconciled.error = Some(SyncError::Conflict {
                event_id,
                action: event.header.action.clone(),
                path: reconciled.change.change().new_path().to_path_buf(),
            });
            result.errors.push(reconciled);
        }
    }

    fn to_remote_event(&self, change: &Change, last_event_id: i64) -> Result<RemoteEvent, SyncError> {
        change.validate()?;
        let action = change.action()?;
        if !change.event_id().is_assigned() {
            return Err(SyncError::ContractViolation(format!(
                "{change} has no event id and cannot be sent"
            )));
        }

        let relative_path = relative_to_root(change.new_path(), &self.sync_root)?;
        let relative_from_path = change
            .old_path()
            .map(|old| relative_to_root(old, &self.sync_root))
            .transpose()?;
        let relative_to_path = (change.change_type() == ChangeType::Renamed)
            .then(|| relative_path.clone());
        let metadata = change.metadata();

        Ok(RemoteEvent {
            header: EventHeader {
                status: None,
                event_id: change.event_id().value(),
                action: action.as_str().to_string(),
            },
            metadata: EventMetadata {
                created_date: metadata.created,
                modified_date: metadata.modified,
                deleted: change.change_type() == ChangeType::Deleted,
                hash: metadata.hash.clone(),
                is_folder: metadata.is_folder,
                last_event_id,
                relative_from_path,
                relative_path,
                relative_to_path,
                revision: metadata.revision.clone(),
                size: metadata.size,
                storage_key: metadata.storage_key.clone(),
                server_id: None,
                target_path: metadata
                    .target_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                version: WIRE_VERSION.to_string(),
            },
        })
    }

    /// Rebuilds a change from a server event
    fn change_from_event(&self, event: &RemoteEvent, direction: Direction) -> Result<Change, SyncError> {
        let action: SyncAction = event.header.action.parse()?;
        let meta = &event.metadata;

        let new_relative = match action.change_type() {
            ChangeType::Renamed => meta.relative_to_path.as_deref().unwrap_or(&meta.relative_path),
            _ => meta.relative_path.as_str(),
        };
        let mut change = Change::new(
            direction,
            action.change_type(),
            join_relative(&self.sync_root, new_relative),
        )
        .with_event_id(event.header.event_id)
        .with_metadata(ChangeMetadata {
            is_folder: meta.is_folder || action.kind() == ItemKind::Folder,
            size: meta.size,
            created: meta.created_date,
            modified: meta.modified_date,
            accessed: None,
            hash: meta.hash.clone(),
            revision: meta.revision.clone(),
            storage_key: meta.storage_key.clone(),
            server_id: meta.server_id.clone(),
            target_path: meta.target_path.as_ref().map(PathBuf::from),
        });
        if let Some(from) = meta.relative_from_path.as_deref().filter(|p| !p.is_empty()) {
            change = change.with_old_path(join_relative(&self.sync_root, from));
        }
        Ok(change)
    }
}

fn parse_sync_id(raw: &str) -> Result<SyncId, SyncError> {
    SyncId::new(raw).map_err(|e| SyncError::Transport(anyhow::anyhow!("response sync id: {e}")))
}

fn take_sent(
    sent: &mut [Option<PendingChange>],
    by_event_id: &HashMap<EventId, usize>,
    event_id: EventId,
) -> Option<PendingChange> {
    by_event_id.get(&event_id).and_then(|&i| sent[i].take())
}

fn server_originated(change: Change) -> ReconciledChange {
    ReconciledChange {
        change: ChangeWithDependencies::new(change),
        original: None,
        stream: None,
        needs_index_update: true,
        status: None,
        error: None,
    }
}

/// Fields the server does not echo back
fn carry_local_fields(server_version: Change, original: &Change) -> Change {
    let mut metadata = server_version.metadata().clone();
    metadata.accessed = original.metadata().accessed;
    let mut change = server_version.with_metadata(metadata);
    if change.old_path().is_none() {
        if let Some(old) = original.old_path() {
            change = change.with_old_path(old);
        }
    }
    change.with_failure_counter(original.failure_counter())
}

/// Joins a `/`-separated relative path onto the sync root
fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}
