//! Remote action and status vocabulary
//!
//! Every change sent to the remote service names one [`SyncAction`], drawn from
//! a fixed vocabulary of item kind (folder, file, symlink) crossed with change
//! type. Combinations the vocabulary does not define are contract violations:
//! a folder is never modified, and a symlink is replaced rather than modified.
//!
//! The server answers each event with an [`EventStatus`]. A missing or empty
//! status marks an event the server originated (direction FromRemote).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::change::ChangeType;
use super::errors::DomainError;

/// Kind of filesystem item an action refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Folder,
    File,
    Symlink,
}

/// Action names understood by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    AddFolder,
    DeleteFolder,
    RenameFolder,
    AddFile,
    ModifyFile,
    DeleteFile,
    RenameFile,
    AddSymlink,
    DeleteSymlink,
    RenameSymlink,
}

impl SyncAction {
    /// Picks the action for an item kind and change type
    ///
    /// # Errors
    /// Returns `DomainError::InvalidChange` for folder+Modified and
    /// symlink+Modified, which the vocabulary does not define.
    pub fn for_change(kind: ItemKind, change_type: ChangeType) -> Result<Self, DomainError> {
        use ChangeType::{Created, Deleted, Modified, Renamed};

        match (kind, change_type) {
            (ItemKind::Folder, Created) => Ok(Self::AddFolder),
            (ItemKind::Folder, Deleted) => Ok(Self::DeleteFolder),
            (ItemKind::Folder, Renamed) => Ok(Self::RenameFolder),
            (ItemKind::File, Created) => Ok(Self::AddFile),
            (ItemKind::File, Modified) => Ok(Self::ModifyFile),
            (ItemKind::File, Deleted) => Ok(Self::DeleteFile),
            (ItemKind::File, Renamed) => Ok(Self::RenameFile),
            (ItemKind::Symlink, Created) => Ok(Self::AddSymlink),
            (ItemKind::Symlink, Deleted) => Ok(Self::DeleteSymlink),
            (ItemKind::Symlink, Renamed) => Ok(Self::RenameSymlink),
            (ItemKind::Folder, Modified) => Err(DomainError::InvalidChange(
                "a folder change cannot be of type Modified".to_string(),
            )),
            (ItemKind::Symlink, Modified) => Err(DomainError::InvalidChange(
                "a file change with a symlink target cannot be of type Modified".to_string(),
            )),
        }
    }

    /// Item kind named by this action
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::AddFolder | Self::DeleteFolder | Self::RenameFolder => ItemKind::Folder,
            Self::AddFile | Self::ModifyFile | Self::DeleteFile | Self::RenameFile => {
                ItemKind::File
            }
            Self::AddSymlink | Self::DeleteSymlink | Self::RenameSymlink => ItemKind::Symlink,
        }
    }

    /// Change type named by this action
    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::AddFolder | Self::AddFile | Self::AddSymlink => ChangeType::Created,
            Self::ModifyFile => ChangeType::Modified,
            Self::DeleteFolder | Self::DeleteFile | Self::DeleteSymlink => ChangeType::Deleted,
            Self::RenameFolder | Self::RenameFile | Self::RenameSymlink => ChangeType::Renamed,
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddFolder => "add_folder",
            Self::DeleteFolder => "delete_folder",
            Self::RenameFolder => "rename_folder",
            Self::AddFile => "add_file",
            Self::ModifyFile => "modify_file",
            Self::DeleteFile => "delete_file",
            Self::RenameFile => "rename_file",
            Self::AddSymlink => "add_symlink",
            Self::DeleteSymlink => "delete_symlink",
            Self::RenameSymlink => "rename_symlink",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add_folder" => Ok(Self::AddFolder),
            "delete_folder" => Ok(Self::DeleteFolder),
            "rename_folder" => Ok(Self::RenameFolder),
            "add_file" => Ok(Self::AddFile),
            "modify_file" => Ok(Self::ModifyFile),
            "delete_file" => Ok(Self::DeleteFile),
            "rename_file" => Ok(Self::RenameFile),
            "add_symlink" => Ok(Self::AddSymlink),
            "delete_symlink" => Ok(Self::DeleteSymlink),
            "rename_symlink" => Ok(Self::RenameSymlink),
            other => Err(DomainError::UnknownAction(other.to_string())),
        }
    }
}

// ============================================================================
// EventStatus
// ============================================================================

/// Outcome the server declares for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// The server applied the change
    Accepted,
    /// The server already had an identical item
    Exists,
    /// The event was already processed
    Duplicate,
    /// The server needs the content uploaded
    Upload,
    /// An upload for this content is already in progress
    Uploading,
    /// The change conflicts with the server's state
    Conflict,
}

impl EventStatus {
    /// Parses the status header of a response event
    ///
    /// `Ok(None)` means the header was missing or empty, which marks a
    /// server-originated (FromRemote) event.
    ///
    /// # Errors
    /// Returns `DomainError::UnknownStatus` for any other unrecognised value
    pub fn parse_header(header: Option<&str>) -> Result<Option<Self>, DomainError> {
        let Some(raw) = header.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        match raw.to_ascii_lowercase().as_str() {
            "accepted" => Ok(Some(Self::Accepted)),
            "exists" => Ok(Some(Self::Exists)),
            "duplicate" => Ok(Some(Self::Duplicate)),
            "upload" => Ok(Some(Self::Upload)),
            "uploading" => Ok(Some(Self::Uploading)),
            "conflict" => Ok(Some(Self::Conflict)),
            _ => Err(DomainError::UnknownStatus(raw.to_string())),
        }
    }

    /// True for statuses that close the event on the server side
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Accepted | Self::Exists | Self::Duplicate)
    }

    /// True for statuses that still expect a content transfer
    pub fn is_pending_transfer(&self) -> bool {
        matches!(self, Self::Upload | Self::Uploading)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Exists => "exists",
            Self::Duplicate => "duplicate",
            Self::Upload => "upload",
            Self::Uploading => "uploading",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}
