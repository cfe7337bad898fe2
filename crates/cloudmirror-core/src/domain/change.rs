//! Change domain entity
//!
//! A [`Change`] describes one filesystem delta: which side must receive it
//! ([`Direction`]), what happened ([`ChangeType`]), where, and the metadata the
//! remote service and the local index need to reconcile it.
//!
//! A change is immutable once built, apart from its retry counter. Ordering
//! constraints between changes are expressed by composition: a
//! [`ChangeWithDependencies`] owns the changes that must wait for it.
//!
//! ## Lifecycle inside a sync run
//!
//! ```text
//!                 ┌─► Completing (sync)  ──┐
//!     Pending ────┤                        ├──► Succeeded | Failed
//!                 └─► Completing (async) ──┘
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::{ItemKind, SyncAction};
use super::errors::DomainError;
use super::newtypes::EventId;
use super::stream::ContentStream;

// ============================================================================
// Direction / ChangeType
// ============================================================================

/// Which side initiated a change and which side must receive it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Originated locally, must be pushed to the remote service
    ToRemote,
    /// Declared by the remote service, must be applied locally
    FromRemote,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToRemote => write!(f, "to_remote"),
            Direction::FromRemote => write!(f, "from_remote"),
        }
    }
}

/// What happened to the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Created => write!(f, "created"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Deleted => write!(f, "deleted"),
            ChangeType::Renamed => write!(f, "renamed"),
        }
    }
}

// ============================================================================
// ChangeMetadata
// ============================================================================

/// Metadata carried by a change
///
/// All fields take part in [`metadata_differs`] except `server_id`, which the
/// server may assign without the local index needing an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    /// Whether the item is a folder
    pub is_folder: bool,
    /// Content size in bytes (0 for folders)
    pub size: u64,
    /// Creation time of the item
    pub created: Option<DateTime<Utc>>,
    /// Last modification time of the item
    pub modified: Option<DateTime<Utc>>,
    /// Last access time of the item
    pub accessed: Option<DateTime<Utc>>,
    /// MD5 content hash, hex encoded
    pub hash: Option<String>,
    /// Revision string assigned by the server
    pub revision: Option<String>,
    /// Remote storage key; set once the server has accepted the item
    pub storage_key: Option<String>,
    /// Server-assigned item id
    pub server_id: Option<String>,
    /// Symlink target, when the item is a symbolic link
    pub target_path: Option<PathBuf>,
}

impl ChangeMetadata {
    /// Metadata for a folder
    pub fn folder() -> Self {
        Self {
            is_folder: true,
            ..Self::default()
        }
    }

    /// Metadata for a regular file of the given size
    pub fn file(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

// ============================================================================
// Change
// ============================================================================

/// One filesystem delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    direction: Direction,
    change_type: ChangeType,
    event_id: EventId,
    new_path: PathBuf,
    old_path: Option<PathBuf>,
    metadata: ChangeMetadata,
    failure_counter: u32,
}

impl Change {
    /// Creates a change with default metadata and an unassigned event id
    pub fn new(direction: Direction, change_type: ChangeType, new_path: impl Into<PathBuf>) -> Self {
        Self {
            direction,
            change_type,
            event_id: EventId::UNASSIGNED,
            new_path: new_path.into(),
            old_path: None,
            metadata: ChangeMetadata::default(),
            failure_counter: 0,
        }
    }

    /// Sets the event id
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<EventId>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Sets the previous path of a rename
    #[must_use]
    pub fn with_old_path(mut self, old_path: impl Into<PathBuf>) -> Self {
        self.old_path = Some(old_path.into());
        self
    }

    /// Replaces the metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: ChangeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the retry counter
    #[must_use]
    pub fn with_failure_counter(mut self, failure_counter: u32) -> Self {
        self.failure_counter = failure_counter;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn new_path(&self) -> &Path {
        &self.new_path
    }

    pub fn old_path(&self) -> Option<&Path> {
        self.old_path.as_deref()
    }

    pub fn metadata(&self) -> &ChangeMetadata {
        &self.metadata
    }

    pub fn failure_counter(&self) -> u32 {
        self.failure_counter
    }

    /// Bumps the retry counter after a failed attempt
    pub fn record_failure(&mut self) {
        self.failure_counter = self.failure_counter.saturating_add(1);
    }

    /// Kind of item this change refers to
    pub fn item_kind(&self) -> ItemKind {
        if self.metadata.is_folder {
            ItemKind::Folder
        } else if self.metadata.target_path.is_some() {
            ItemKind::Symlink
        } else {
            ItemKind::File
        }
    }

    /// Action name used on the wire
    ///
    /// # Errors
    /// Returns `DomainError::InvalidChange` when the shape has no action
    pub fn action(&self) -> Result<SyncAction, DomainError> {
        SyncAction::for_change(self.item_kind(), self.change_type)
    }

    /// Checks the invariants every change must hold
    ///
    /// # Errors
    /// Returns `DomainError::InvalidChange` if:
    /// - a folder change is of type Modified
    /// - a symlink change is of type Modified
    /// - a rename has no old path
    pub fn validate(&self) -> Result<(), DomainError> {
        self.action()?;
        if self.change_type == ChangeType::Renamed && self.old_path.is_none() {
            return Err(DomainError::InvalidChange(format!(
                "rename of {} has no old path",
                self.new_path.display()
            )));
        }
        Ok(())
    }

    /// True once the server has assigned a non-blank storage key
    pub fn has_storage_key(&self) -> bool {
        self.metadata
            .storage_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// True for a file create/modify bound for the remote side that needs content
    pub fn needs_upload(&self) -> bool {
        self.direction == Direction::ToRemote
            && self.item_kind() == ItemKind::File
            && matches!(self.change_type, ChangeType::Created | ChangeType::Modified)
    }

    /// True for an upload candidate that has no content stream to send
    pub fn is_upload_without_stream(&self, stream: Option<&ContentStream>) -> bool {
        self.needs_upload() && stream.map_or(true, ContentStream::is_disposed)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} #{} {}",
            self.direction,
            self.change_type,
            self.event_id,
            self.new_path.display()
        )
    }
}

/// Returns true when any field the local index records differs between two changes
///
/// Compares direction, hash, every timestamp, the folder flag, size, symlink
/// target, revision, storage key and both paths.
pub fn metadata_differs(a: &Change, b: &Change) -> bool {
    let (ma, mb) = (&a.metadata, &b.metadata);

    a.direction != b.direction
        || ma.hash != mb.hash
        || ma.created != mb.created
        || ma.modified != mb.modified
        || ma.accessed != mb.accessed
        || ma.is_folder != mb.is_folder
        || ma.size != mb.size
        || ma.target_path != mb.target_path
        || ma.revision != mb.revision
        || ma.storage_key != mb.storage_key
        || a.new_path != b.new_path
        || a.old_path != b.old_path
}

/// Path relative to the sync root, with `/` separators
///
/// # Errors
/// Returns `DomainError::PathNotInSyncRoot` if `path` is outside `root`
pub fn relative_to_root(path: &Path, root: &Path) -> Result<String, DomainError> {
    let relative = path.strip_prefix(root).map_err(|_| {
        DomainError::PathNotInSyncRoot(format!(
            "{} is not within {}",
            path.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

// ============================================================================
// ChangeWithDependencies
// ============================================================================

/// A change together with the changes that must not run before it succeeds
///
/// The dependency list belongs to this change alone. It is flattened out once
/// the parent completes, and travels with the parent when the parent fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeWithDependencies {
    change: Change,
    dependencies: Vec<Change>,
}

impl ChangeWithDependencies {
    /// Wraps a change with no dependents
    pub fn new(change: Change) -> Self {
        Self {
            change,
            dependencies: Vec::new(),
        }
    }

    /// Wraps a change with the given dependents
    pub fn with_dependencies(change: Change, dependencies: Vec<Change>) -> Self {
        Self {
            change,
            dependencies,
        }
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    pub fn dependencies(&self) -> &[Change] {
        &self.dependencies
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub fn event_id(&self) -> EventId {
        self.change.event_id()
    }

    /// Appends dependents discovered after construction
    pub fn add_dependencies(&mut self, dependencies: impl IntoIterator<Item = Change>) {
        self.dependencies.extend(dependencies);
    }

    /// Removes and returns the dependents, leaving the parent bare
    pub fn take_dependencies(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.dependencies)
    }

    pub fn into_parts(self) -> (Change, Vec<Change>) {
        (self.change, self.dependencies)
    }

    /// The parent followed by its dependents, for requeueing as a unit
    pub fn into_flattened(self) -> Vec<Change> {
        let mut all = Vec::with_capacity(1 + self.dependencies.len());
        all.push(self.change);
        all.extend(self.dependencies);
        all
    }
}

impl From<Change> for ChangeWithDependencies {
    fn from(change: Change) -> Self {
        Self::new(change)
    }
}

// ============================================================================
// PendingChange
// ============================================================================

/// A change waiting to be processed, with its open content stream if any
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub change: ChangeWithDependencies,
    pub stream: Option<ContentStream>,
}

impl PendingChange {
    pub fn new(change: impl Into<ChangeWithDependencies>, stream: Option<ContentStream>) -> Self {
        Self {
            change: change.into(),
            stream,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.change.event_id()
    }

    /// True when this entry refers to the same event and the same stream as `other`
    pub fn matches(&self, other: &PendingChange) -> bool {
        self.event_id() == other.event_id()
            && match (&self.stream, &other.stream) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                (None, None) => true,
                _ => false,
            }
    }
}
