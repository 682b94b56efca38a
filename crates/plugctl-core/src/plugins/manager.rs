//! Installer orchestration
//!
//! Every add and update walks `Resolving -> Fetching -> Verifying ->
//! Installing -> Reconciled`. Nothing outside the per-operation temp
//! workspace is touched before `Installing`, and the manifest and lockfile
//! only change in `Reconciled`. The workspace is a [`TempDir`], so it is
//! removed on every exit path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tempfile::TempDir;

use super::fs_ops;
use super::lockfile::{LockDist, LockEntry, Lockfile};
use super::manifest::PluginManifest;
use super::resolver::{self, Constraint};
use super::verifier::{self, DirectoryMetadata};
use super::{PluginKey, VersionConstraint};
use crate::config::ManagerConfig;
use crate::constants::{files, install, registry as registry_defaults};
use crate::error::{PluginError, Result};
use crate::fetch::{FetchSource, Fetcher, SourceFetcher};
use crate::logging::Logger;
use crate::registry::{HttpRegistryClient, RegistryClient, RegistryConfig, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStage {
    Resolving,
    Fetching,
    Verifying,
    Installing,
    Reconciled,
}

impl OperationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::Installing => "installing",
            Self::Reconciled => "reconciled",
        }
    }
}

/// What to install for a plugin
#[derive(Debug, Clone)]
pub enum VersionRequest {
    /// Manifest-style constraint, `None` meaning latest
    Constraint(Option<String>),
    /// Already resolved version; resolution is skipped
    Exact(Box<Version>),
}

impl VersionRequest {
    pub fn latest() -> Self {
        Self::Constraint(None)
    }

    pub fn constraint(raw: impl Into<String>) -> Self {
        Self::Constraint(Some(raw.into()))
    }

    /// Value recorded in the manifest for an explicit add
    fn manifest_value(&self) -> Option<String> {
        match self {
            Self::Constraint(constraint) => constraint.clone(),
            Self::Exact(version) => Some(version.tag.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub key: PluginKey,
    pub tag: String,
    pub reference: String,
    pub path: PathBuf,
    /// `archive` or `repository`
    pub source: &'static str,
    pub metadata: DirectoryMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated {
        from: String,
        installed: InstallSummary,
    },
    AlreadyUpToDate {
        tag: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NothingToRemove,
}

/// Per-plugin results of a batch install
#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<InstallSummary>,
    pub failed: Vec<(PluginKey, PluginError)>,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CommitReport {
    pub manifest_written: bool,
    pub lockfile_written: bool,
    pub errors: Vec<String>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginListing {
    pub key: PluginKey,
    /// `None` when not declared, `Some(None)` when declared as latest
    pub constraint: Option<Option<String>>,
    pub locked: Option<LockEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Installed,
    /// In the manifest, never installed
    DeclaredNotInstalled,
    /// Locked, but the directory is gone
    MissingDirectory,
    /// On disk without a lock entry
    Untracked,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::DeclaredNotInstalled => "declared-not-installed",
            Self::MissingDirectory => "missing-directory",
            Self::Untracked => "untracked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatus {
    /// Untracked directories are not guaranteed to be valid keys
    pub key: String,
    pub state: PluginState,
    pub version: Option<String>,
}

struct StagedArtifact {
    // Dropping this deletes everything fetched
    _workspace: TempDir,
    root: PathBuf,
    source: FetchSource,
    metadata: DirectoryMetadata,
}

/// Installs, updates, and removes plugins for one session.
///
/// Manifest and lockfile are loaded at construction, mutated in memory,
/// and persisted once by [`PluginManager::commit`].
pub struct PluginManager {
    config: ManagerConfig,
    registry: Arc<dyn RegistryClient>,
    fetcher: Arc<dyn Fetcher>,
    logger: Logger,
    manifest: Mutex<PluginManifest>,
    lockfile: Mutex<Lockfile>,
}

impl PluginManager {
    pub fn new(
        config: ManagerConfig,
        registry: Arc<dyn RegistryClient>,
        fetcher: Arc<dyn Fetcher>,
        logger: Logger,
    ) -> Self {
        logger.info("start", "Plugin manager is starting.", &[]);

        ensure_dir(&logger, "createPluginsDir", &config.plugins_dir);
        if let Some(temp_dir) = &config.temp_dir {
            ensure_dir(&logger, "createTempDir", temp_dir);
        }

        let manifest = PluginManifest::load(config.manifest_path(), logger.clone());
        let lockfile = Lockfile::load(config.lockfile_path(), logger.clone());

        Self {
            config,
            registry,
            fetcher,
            logger,
            manifest: Mutex::new(manifest),
            lockfile: Mutex::new(lockfile),
        }
    }

    /// Production wiring: HTTP registry client and the default fetcher
    pub fn from_config(config: ManagerConfig, logger: Logger) -> anyhow::Result<Self> {
        let registry = HttpRegistryClient::new(RegistryConfig::from(&config))?;
        let fetcher = SourceFetcher::from_config(&config)?;
        Ok(Self::new(config, Arc::new(registry), Arc::new(fetcher), logger))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn plugin_dir(&self, key: &PluginKey) -> PathBuf {
        self.config.plugins_dir.join(key.relative_dir())
    }

    pub fn declared_constraint(&self, key: &PluginKey) -> Option<Option<String>> {
        self.manifest.lock().plugins().get(key).cloned()
    }

    pub fn lock_entry(&self, key: &PluginKey) -> Option<LockEntry> {
        self.lockfile.lock().get(key).cloned()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.manifest.lock().has_changed() || self.lockfile.lock().has_changed()
    }

    /// Install one plugin. With `add_to_manifest`, the requested constraint
    /// (or the exact tag) is declared in the manifest as well.
    pub async fn add(
        &self,
        key: &PluginKey,
        request: VersionRequest,
        add_to_manifest: bool,
    ) -> Result<InstallSummary> {
        let shown = request
            .manifest_value()
            .unwrap_or_else(|| install::LATEST.to_string());
        self.logger.info(
            "add.start",
            "Adding plugin.",
            &[("pluginKey", key.as_str()), ("constraint", &shown)],
        );

        let manifest_value = add_to_manifest.then(|| request.manifest_value());
        let result = async move {
            let version = match request {
                VersionRequest::Exact(version) => *version,
                VersionRequest::Constraint(constraint) => {
                    self.resolve("add", key, constraint.as_deref()).await?
                }
            };
            let staged = self.stage(key, &version).await?;
            self.install_staged(key, &version, staged, manifest_value)
                .await
        }
        .await;

        match &result {
            Ok(summary) => self.logger.success(
                "add.end",
                "Plugin installed.",
                &[("pluginKey", key.as_str()), ("version", &summary.tag)],
            ),
            Err(e) => self.log_failure("add", key, e),
        }
        result
    }

    /// Re-resolve a declared plugin against its manifest constraint and
    /// install the result if it differs from the lock entry.
    pub async fn update(&self, key: &PluginKey) -> Result<UpdateOutcome> {
        self.logger.info(
            "update.start",
            "Updating plugin.",
            &[("pluginKey", key.as_str())],
        );

        let result = self.update_inner(key).await;
        match &result {
            Ok(UpdateOutcome::Updated { from, installed }) => self.logger.success(
                "update.end",
                "Plugin was updated.",
                &[
                    ("pluginKey", key.as_str()),
                    ("from", from),
                    ("to", &installed.tag),
                ],
            ),
            Ok(UpdateOutcome::AlreadyUpToDate { tag }) => self.logger.warning(
                "update.alreadyUpToDate",
                "Plugin is already up to date.",
                &[("pluginKey", key.as_str()), ("version", tag)],
            ),
            Err(e) => self.log_failure("update", key, e),
        }
        result
    }

    async fn update_inner(&self, key: &PluginKey) -> Result<UpdateOutcome> {
        let constraint = self
            .declared_constraint(key)
            .ok_or_else(|| PluginError::PluginNotDeclared {
                key: key.to_string(),
            })?;
        let current = self.lock_entry(key).ok_or_else(|| PluginError::NotInstalled {
            key: key.to_string(),
        })?;

        let version = self.resolve("update", key, constraint.as_deref()).await?;
        if current.same_resolution(&version) {
            return Ok(UpdateOutcome::AlreadyUpToDate { tag: version.tag });
        }

        // The new version is fully staged before the old install is replaced
        let staged = self.stage(key, &version).await?;
        let installed = self.install_staged(key, &version, staged, None).await?;

        Ok(UpdateOutcome::Updated {
            from: current.version,
            installed,
        })
    }

    /// Delete a plugin's directory and drop it from manifest and lockfile
    pub async fn remove(&self, key: &PluginKey) -> Result<RemoveOutcome> {
        self.logger.info(
            "remove.start",
            "Removing plugin.",
            &[("pluginKey", key.as_str())],
        );

        let dir = self.plugin_dir(key);
        if !dir.exists() {
            self.logger.warning(
                "remove.nothingToRemove",
                "Nothing to remove.",
                &[("pluginKey", key.as_str())],
            );
            return Ok(RemoveOutcome::NothingToRemove);
        }

        let (target, root) = (dir.clone(), self.config.plugins_dir.clone());
        let removal = tokio::task::spawn_blocking(move || fs_ops::remove_plugin_dir(&target, &root))
            .await
            .map_err(|e| PluginError::Io(std::io::Error::other(e)))?;

        if let Err(e) = removal {
            let path = dir.display().to_string();
            self.logger.error(
                "remove.removeDirError",
                format!("Could not remove plugin directory: {}", e),
                &[("pluginKey", key.as_str()), ("path", &path)],
            );
            // Only keep the metadata while there is still something installed
            if fs_ops::dir_has_content(&dir) {
                return Err(PluginError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to remove {}: {}", path, e),
                )));
            }
        }

        {
            let mut manifest = self.manifest.lock();
            let mut lockfile = self.lockfile.lock();
            manifest.remove_plugin(key);
            lockfile.remove_plugin(key);
        }

        self.logger.success(
            "remove.end",
            "Plugin removed.",
            &[("pluginKey", key.as_str())],
        );
        Ok(RemoveOutcome::Removed)
    }

    /// Add each plugin independently, up to `concurrency` at a time. A
    /// failure is recorded for its plugin and never stops the others.
    /// A key given more than once is installed once, with its last constraint.
    pub async fn install(
        &self,
        plugins: Vec<(PluginKey, Option<String>)>,
        add_to_manifest: bool,
    ) -> InstallReport {
        // Two operations on one key would share its staging directory
        let plugins: BTreeMap<PluginKey, Option<String>> = plugins.into_iter().collect();
        if plugins.is_empty() {
            self.logger
                .warning("install.nothingToInstall", "Nothing to install.", &[]);
            return InstallReport::default();
        }

        let concurrency = self.config.concurrency.max(1);
        let results: Vec<(PluginKey, Result<InstallSummary>)> = stream::iter(plugins)
            .map(|(key, constraint)| async move {
                let result = self
                    .add(&key, VersionRequest::Constraint(constraint), add_to_manifest)
                    .await;
                (key, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = InstallReport::default();
        for (key, result) in results {
            match result {
                Ok(summary) => report.installed.push(summary),
                Err(e) => report.failed.push((key, e)),
            }
        }
        report.installed.sort_by(|a, b| a.key.cmp(&b.key));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        if !report.failed.is_empty() {
            let failed = report.failed.len().to_string();
            let installed = report.installed.len().to_string();
            self.logger.warning(
                "install.partialFailure",
                "Some plugins could not be installed.",
                &[("failed", &failed), ("installed", &installed)],
            );
        }
        report
    }

    /// Install everything the manifest declares without re-declaring it
    pub async fn install_from_manifest(&self) -> InstallReport {
        let plugins: Vec<(PluginKey, Option<String>)> = self
            .manifest
            .lock()
            .plugins()
            .iter()
            .map(|(key, constraint)| (key.clone(), constraint.clone()))
            .collect();

        self.install(plugins, false).await
    }

    /// Merged view of declared and locked plugins, sorted by key
    pub fn list(&self) -> Vec<PluginListing> {
        let manifest = self.manifest.lock();
        let lockfile = self.lockfile.lock();

        let keys: BTreeSet<&PluginKey> = manifest
            .plugins()
            .keys()
            .chain(lockfile.plugins().keys())
            .collect();

        keys.into_iter()
            .map(|key| PluginListing {
                key: key.clone(),
                constraint: manifest.plugins().get(key).cloned(),
                locked: lockfile.get(key).cloned(),
            })
            .collect()
    }

    /// Compare manifest, lockfile, and the plugins directory
    pub fn status(&self) -> Result<Vec<PluginStatus>> {
        let mut statuses = Vec::new();
        let mut seen = BTreeSet::new();

        for listing in self.list() {
            let dir = self.plugin_dir(&listing.key);
            let state = match &listing.locked {
                Some(_) if fs_ops::dir_has_content(&dir) => PluginState::Installed,
                Some(_) => PluginState::MissingDirectory,
                None => PluginState::DeclaredNotInstalled,
            };
            seen.insert(listing.key.to_string());
            statuses.push(PluginStatus {
                key: listing.key.to_string(),
                state,
                version: listing.locked.map(|entry| entry.version),
            });
        }

        for (vendor, name) in fs_ops::installed_dirs(&self.config.plugins_dir)? {
            let key = format!("{}/{}", vendor, name);
            if !seen.contains(&key) {
                statuses.push(PluginStatus {
                    key,
                    state: PluginState::Untracked,
                    version: None,
                });
            }
        }

        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(statuses)
    }

    /// Persist manifest and lockfile, each only if it changed. Write
    /// failures are collected, the in-memory state stays as it is.
    pub fn commit(&self) -> CommitReport {
        let mut report = CommitReport::default();

        {
            let mut manifest = self.manifest.lock();
            if manifest.has_changed() {
                self.logger
                    .info("commit.saveManifest", "Saving plugins.json.", &[]);
                match manifest.write() {
                    Ok(()) => {
                        report.manifest_written = true;
                        self.logger
                            .success("commit.manifestSaved", "Saved plugins.json.", &[]);
                    }
                    Err(e) => report.errors.push(format!("{:#}", e)),
                }
            }
        }

        {
            let mut lockfile = self.lockfile.lock();
            if lockfile.has_changed() {
                self.logger
                    .info("commit.saveLockfile", "Saving plugins-lock.json.", &[]);
                match lockfile.write() {
                    Ok(()) => {
                        report.lockfile_written = true;
                        self.logger.success(
                            "commit.lockfileSaved",
                            "Saved plugins-lock.json.",
                            &[],
                        );
                    }
                    Err(e) => report.errors.push(format!("{:#}", e)),
                }
            }
        }

        report
    }

    async fn resolve(&self, op: &str, key: &PluginKey, constraint: Option<&str>) -> Result<Version> {
        self.enter(key, OperationStage::Resolving);

        let requested = match VersionConstraint::parse(constraint) {
            VersionConstraint::Range(range) => {
                Constraint::parse(&range).map_err(|e| e.for_plugin(key))?;
                let list = self
                    .registry
                    .get_version_list(key)
                    .await
                    .map_err(|e| PluginError::from_registry(key.as_str(), &range, e))?;
                let tag = resolver::resolve(&range, &list.all_tags).map_err(|e| e.for_plugin(key))?;
                Some(tag)
            }
            other => other.registry_ref().map(str::to_string),
        };

        let shown = requested.as_deref().unwrap_or(install::LATEST);
        let version = self
            .registry
            .get_version(key, requested.as_deref())
            .await
            .map_err(|e| PluginError::from_registry(key.as_str(), shown, e))?;

        self.logger.info(
            &format!("{}.resolved", op),
            "Resolved plugin version.",
            &[
                ("pluginKey", key.as_str()),
                ("version", &version.tag),
                ("reference", &version.commit_hash),
            ],
        );
        Ok(version)
    }

    /// Fetch and verify into a fresh workspace
    async fn stage(&self, key: &PluginKey, version: &Version) -> Result<StagedArtifact> {
        self.enter(key, OperationStage::Fetching);
        let workspace = self.temp_workspace()?;
        let (root, source) = self.fetch_artifact(key, version, workspace.path()).await?;

        self.enter(key, OperationStage::Verifying);
        let metadata = verifier::compute_metadata_blocking(root.clone()).await?;
        if let FetchSource::Archive { checksum, .. } = &source {
            if !metadata.matches(checksum) {
                return Err(PluginError::CorruptArtifact {
                    key: key.to_string(),
                    version: version.tag.clone(),
                    expected: checksum.clone(),
                    actual: metadata.checksum,
                });
            }
        }

        Ok(StagedArtifact {
            _workspace: workspace,
            root,
            source,
            metadata,
        })
    }

    /// Archive first when the registry publishes one, then a checkout
    async fn fetch_artifact(
        &self,
        key: &PluginKey,
        version: &Version,
        workspace: &Path,
    ) -> Result<(PathBuf, FetchSource)> {
        let mut failures = Vec::new();

        for source in fetch_sources(version) {
            match self.fetcher.fetch(key, &source, workspace).await {
                Ok(root) => return Ok((root, source)),
                Err(e) => {
                    let reason = format!("{:#}", e);
                    self.logger.warning(
                        "add.fetchAttemptFailed",
                        format!("Could not fetch plugin from {}.", source.describe()),
                        &[
                            ("pluginKey", key.as_str()),
                            ("url", source.url()),
                            ("reason", &reason),
                        ],
                    );
                    failures.push(format!("{}: {}", source.describe(), reason));
                }
            }
        }

        Err(PluginError::FetchFailed {
            key: key.to_string(),
            version: version.tag.clone(),
            reason: failures.join("; "),
        })
    }

    async fn install_staged(
        &self,
        key: &PluginKey,
        version: &Version,
        staged: StagedArtifact,
        manifest_value: Option<Option<String>>,
    ) -> Result<InstallSummary> {
        self.enter(key, OperationStage::Installing);
        let dest = self.plugin_dir(key);
        let (src, target) = (staged.root.clone(), dest.clone());
        tokio::task::spawn_blocking(move || fs_ops::replace_dir_staged(&src, &target))
            .await
            .map_err(|e| PluginError::Io(std::io::Error::other(e)))?
            .map_err(|source| PluginError::InstallWriteFailed {
                key: key.to_string(),
                path: dest.clone(),
                source,
            })?;

        self.enter(key, OperationStage::Reconciled);
        let dist = match &staged.source {
            FetchSource::Archive { url, .. } => Some(LockDist {
                url: url.clone(),
                checksum: staged.metadata.checksum.clone(),
            }),
            FetchSource::Repository { .. } => None,
        };
        {
            let mut manifest = self.manifest.lock();
            let mut lockfile = self.lockfile.lock();
            lockfile.add_plugin(key.clone(), LockEntry::from_version(version, dist));
            if let Some(constraint) = manifest_value {
                manifest.add_plugin(key.clone(), constraint);
            }
        }

        self.notify_download(key, &version.tag).await;

        Ok(InstallSummary {
            key: key.clone(),
            tag: version.tag.clone(),
            reference: version.commit_hash.clone(),
            path: dest,
            source: staged.source.describe(),
            metadata: staged.metadata,
        })
    }

    /// Best effort: one retry, then a warning
    async fn notify_download(&self, key: &PluginKey, tag: &str) {
        for attempt in 1..=registry_defaults::INCREMENT_ATTEMPTS {
            match self.registry.increment_download(key, tag).await {
                Ok(()) => return,
                Err(e) if attempt < registry_defaults::INCREMENT_ATTEMPTS => {
                    tracing::debug!(plugin = %key, attempt, "Download increment failed, retrying: {}", e);
                }
                Err(e) => {
                    self.logger.warning(
                        "add.downloadIncrementFailed",
                        format!("Could not increment download count: {}", e),
                        &[("pluginKey", key.as_str()), ("version", tag)],
                    );
                }
            }
        }
    }

    fn temp_workspace(&self) -> Result<TempDir> {
        let parent = self
            .config
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&parent)?;
        Ok(tempfile::Builder::new()
            .prefix(files::TEMP_PREFIX)
            .tempdir_in(&parent)?)
    }

    fn enter(&self, key: &PluginKey, stage: OperationStage) {
        tracing::debug!(plugin = %key, stage = stage.as_str(), "Entering stage");
    }

    fn log_failure(&self, op: &str, key: &PluginKey, err: &PluginError) {
        self.logger.error(
            &format!("{}.{}", op, err.code()),
            err.to_string(),
            &[("pluginKey", key.as_str())],
        );
    }
}

fn fetch_sources(version: &Version) -> Vec<FetchSource> {
    let mut sources = Vec::with_capacity(2);
    // An archive is only usable when there is a checksum to verify it with
    if let (Some(url), Some(checksum)) = (&version.archive_url, &version.archive_checksum) {
        sources.push(FetchSource::Archive {
            url: url.clone(),
            checksum: checksum.clone(),
        });
    }
    sources.push(FetchSource::Repository {
        url: version.plugin.repository_url.clone(),
        subfolder: version.plugin.manifest_root.clone(),
        reference: version.commit_hash.clone(),
    });
    sources
}

fn ensure_dir(logger: &Logger, code: &str, dir: &Path) {
    if dir.exists() {
        return;
    }

    let path = dir.display().to_string();
    logger.info(
        &format!("open.{}", code),
        "Directory does not exist, creating it.",
        &[("path", &path)],
    );
    match std::fs::create_dir_all(dir) {
        Ok(()) => logger.success(
            &format!("open.{}Success", code),
            "Directory has been created.",
            &[("path", &path)],
        ),
        Err(e) => logger.error(
            &format!("open.{}Error", code),
            format!("Could not create directory: {}", e),
            &[("path", &path)],
        ),
    }
}
