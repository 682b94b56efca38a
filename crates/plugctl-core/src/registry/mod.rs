//! Plugin registry boundary
//!
//! The installer only talks to the registry through [`RegistryClient`]:
//! one version lookup, one version list lookup, and a best-effort download
//! counter. [`HttpRegistryClient`] is the production implementation.

mod client;
mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::plugins::PluginKey;

pub use client::{HttpRegistryClient, RegistryConfig};
pub use types::{Author, PluginInfo, Version, VersionList};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} was not found")]
    NotFound(String),

    #[error("registry request failed: {0}")]
    Unavailable(String),

    #[error("invalid registry payload: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Look up one version. `None` or `"latest"` returns the newest
    /// published version, a `dev-*` ref returns that development version.
    async fn get_version(
        &self,
        key: &PluginKey,
        version: Option<&str>,
    ) -> Result<Version, RegistryError>;

    async fn get_version_list(&self, key: &PluginKey) -> Result<VersionList, RegistryError>;

    /// Fire-and-forget download counter
    async fn increment_download(&self, key: &PluginKey, tag: &str) -> Result<(), RegistryError>;
}
