//! Domain entities and value types
//!
//! - Newtypes for event, sync and correlation identifiers
//! - `Change` and `ChangeWithDependencies`
//! - `ContentStream`, the shared handle to upload content
//! - The action and status vocabulary spoken with the remote service
//! - Domain-specific error types

pub mod action;
pub mod change;
pub mod errors;
pub mod newtypes;
pub mod stream;

pub use action::{EventStatus, ItemKind, SyncAction};
pub use change::{
    metadata_differs, relative_to_root, Change, ChangeMetadata, ChangeType,
    ChangeWithDependencies, Direction, PendingChange,
};
pub use errors::DomainError;
pub use newtypes::{CorrelationId, EventId, SyncId};
pub use stream::{ContentStream, StreamSource};
