//! cloudmirror sync - sync run orchestration
//!
//! Provides:
//! - The single-flight sync run that reconciles local changes with the remote service
//! - A failure queue with a background retry timer
//! - Local completion of server changes (staged downloads) and content uploads
//! - Default adapters for applying changes on disk and ordering changes by folder ancestry
//!
//! ## Modules
//!
//! - [`orchestrator`] - [`SyncRunner`], the phase-by-phase sync run
//! - [`communicate`] - Batch exchange with the remote service and response reconciliation
//! - [`completion`] - Local completion engine and deferred transfer tasks
//! - [`failure_queue`] - Failure queue and retry timer
//! - [`transfers`] - Direction-specific transfer pools
//! - [`filesystem`] - Local filesystem applier
//! - [`resolver`] - Parent-path dependency resolver

pub mod communicate;
pub mod completion;
pub mod error;
pub mod failure_queue;
pub mod filesystem;
pub mod logging;
pub mod orchestrator;
pub mod resolver;
pub mod temp_downloads;
pub mod transfers;

pub use error::{AggregateError, SyncError, SyncPhase};
pub use failure_queue::FailureQueueHandle;
pub use filesystem::FileSystemApplier;
pub use orchestrator::{RunReport, SyncCollaborators, SyncRunner};
pub use resolver::ParentPathResolver;
