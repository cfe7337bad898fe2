//! cloudmirror core - domain types, configuration and ports
//!
//! This crate holds everything the synchronization core needs that does not
//! perform I/O itself:
//! - **Domain** - `Change`, `ChangeWithDependencies`, `ContentStream`, the wire
//!   action/status vocabulary and the metadata comparison used during reconciliation
//! - **Ports** - traits for the collaborators the sync run consumes: the change
//!   source, the local index, the dependency resolver, the local applier, the
//!   remote service and the content uploader
//! - **Config** - YAML-backed configuration with validation and a builder
//!
//! # Architecture
//!
//! The crate follows the ports & adapters layout. Adapters live in
//! `cloudmirror-remote` (HTTP) and `cloudmirror-sync` (filesystem, resolver),
//! and the orchestrator in `cloudmirror-sync` only talks to the traits defined here.

pub mod config;
pub mod domain;
pub mod ports;
