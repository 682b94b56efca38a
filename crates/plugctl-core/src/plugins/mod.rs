//! Plugin installation and state reconciliation.
//!
//! This module resolves version constraints, installs verified artifacts
//! under `<plugins_dir>/<vendor>/<name>`, and keeps `plugins.json` and
//! `plugins-lock.json` in step with what is on disk.

pub mod fs_ops;
mod lockfile;
mod manager;
mod manifest;
pub mod resolver;
mod store;
mod types;
pub mod verifier;

pub use lockfile::{LockDist, LockEntry, LockSource, Lockfile};
pub use manager::{
    CommitReport, InstallReport, InstallSummary, OperationStage, PluginListing, PluginManager,
    PluginState, PluginStatus, RemoveOutcome, UpdateOutcome, VersionRequest,
};
pub use manifest::PluginManifest;
pub use types::{PluginKey, VersionConstraint};
pub use verifier::DirectoryMetadata;
