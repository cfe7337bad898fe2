//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. The sync run depends on these interfaces, but
//! their implementations live in adapter crates or in the host application.
//!
//! ## Ports Overview
//!
//! - [`IChangeSource`] - Pending changes from the filesystem monitor, and re-injection upstream
//! - [`ISyncIndex`] - The local persistent index of events and sync checkpoints
//! - [`IDependencyResolver`] - Partitions changes into ready and waiting sets
//! - [`ILocalApplier`] - Applies server-declared changes to the local tree
//! - [`IRemoteService`] - SyncTo / SyncFrom / Download against the remote service
//! - [`IContentUploader`] - Pushes file content for changes the server asked to upload

pub mod change_source;
pub mod content_uploader;
pub mod dependency_resolver;
pub mod local_applier;
pub mod remote_service;
pub mod sync_index;

pub use change_source::{GrabbedChanges, IChangeSource};
pub use content_uploader::IContentUploader;
pub use dependency_resolver::{DependencyAssignment, IDependencyResolver};
pub use local_applier::ILocalApplier;
pub use remote_service::{
    DownloadRequest, EventHeader, EventMetadata, IRemoteService, RemoteEvent, SyncFromRequest,
    SyncResponse, SyncToRequest, WIRE_VERSION,
};
pub use sync_index::ISyncIndex;
