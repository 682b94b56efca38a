//! Artifact transport
//!
//! A [`Fetcher`] turns a [`FetchSource`] into a local directory holding the
//! plugin's files. [`SourceFetcher`] handles both registry archives and git
//! checkouts; the installer decides which one to try first.

mod archive;
mod git;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::ManagerConfig;
use crate::plugins::PluginKey;

pub use archive::{descend_single_root, unpack_archive, ArchiveKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    /// Prebuilt archive published by the registry
    Archive {
        url: String,
        /// Expected directory checksum of the unpacked content
        checksum: String,
    },
    /// Source checkout at a fixed reference
    Repository {
        url: String,
        /// Path of the plugin inside the repository, empty for the root
        subfolder: String,
        reference: String,
    },
}

impl FetchSource {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Archive { .. } => "archive",
            Self::Repository { .. } => "repository",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Archive { url, .. } | Self::Repository { url, .. } => url,
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Materialize `source` inside `workspace` and return the directory
    /// holding the plugin root. Everything written stays under `workspace`.
    async fn fetch(&self, key: &PluginKey, source: &FetchSource, workspace: &Path)
        -> Result<PathBuf>;
}

/// Default fetcher: HTTP or local archives, and `git` checkouts
#[derive(Clone)]
pub struct SourceFetcher {
    http_client: reqwest::Client,
    git_program: String,
}

impl SourceFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http_client,
            git_program: "git".to_string(),
        })
    }

    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        Self::new(
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Use a specific git executable instead of the one on `PATH`
    pub fn with_git_program(mut self, program: impl Into<String>) -> Self {
        self.git_program = program.into();
        self
    }
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(
        &self,
        key: &PluginKey,
        source: &FetchSource,
        workspace: &Path,
    ) -> Result<PathBuf> {
        match source {
            FetchSource::Archive { url, .. } => {
                tracing::debug!(plugin = %key, url = %url, "Fetching archive");
                let bytes = archive::read_archive(&self.http_client, url).await?;
                let dest = workspace.join("archive");
                let unpack_dest = dest.clone();
                tokio::task::spawn_blocking(move || unpack_archive(&bytes, &unpack_dest))
                    .await
                    .context("archive extraction task failed")??;
                descend_single_root(&dest)
            }
            FetchSource::Repository {
                url,
                subfolder,
                reference,
            } => {
                tracing::debug!(plugin = %key, url = %url, reference = %reference, "Checking out repository");
                let checkout = workspace.join("checkout");
                git::checkout(&self.git_program, url, reference, &checkout).await?;
                git::plugin_root(&checkout, subfolder)
            }
        }
    }
}
