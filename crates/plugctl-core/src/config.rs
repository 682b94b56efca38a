//! Manager configuration
//!
//! Resolution order: built-in defaults, then the TOML file, then
//! `PLUGCTL_*` environment variables, then explicit overrides from the CLI.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{self, files, install, registry};
use crate::paths;

pub const ENV_REGISTRY_URL: &str = "PLUGCTL_REGISTRY_URL";
pub const ENV_PLUGINS_DIR: &str = "PLUGCTL_PLUGINS_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Registry root, without the `/api/v<n>` suffix
    pub registry_url: String,
    pub api_version: String,
    /// Directory holding plugins.json and plugins-lock.json
    pub state_dir: PathBuf,
    /// Installed plugins live in `<plugins_dir>/<vendor>/<name>`
    pub plugins_dir: PathBuf,
    /// Parent of per-plugin temporary workspaces (system temp when unset)
    pub temp_dir: Option<PathBuf>,
    /// Plugins processed in parallel by a manifest install
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            registry_url: registry::DEFAULT_URL.to_string(),
            api_version: registry::API_VERSION.to_string(),
            state_dir: paths::default_state_dir(),
            plugins_dir: paths::default_plugins_dir(),
            temp_dir: None,
            concurrency: install::DEFAULT_CONCURRENCY,
            request_timeout_secs: registry::REQUEST_TIMEOUT_SECS,
            user_agent: constants::default_user_agent(),
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub registry_url: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub plugins_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
}

impl ManagerConfig {
    /// Rooted at `state_dir`: manifest files there, plugins in `state_dir/plugins`
    pub fn for_root(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            plugins_dir: state_dir.join(files::PLUGINS_DIR_NAME),
            state_dir,
            ..Self::default()
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir.join(files::MANIFEST_FILE_NAME)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.state_dir.join(files::LOCKFILE_FILE_NAME)
    }

    /// Load config from a TOML file. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ManagerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Full resolution: file (explicit path or `<state dir>/plugctl.toml`),
    /// environment, then CLI overrides. The result is validated.
    pub fn resolve(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                Self::load_from_path(path)?
            }
            None => {
                let state_dir = overrides
                    .state_dir
                    .clone()
                    .unwrap_or_else(paths::default_state_dir);
                let mut config = Self::load_from_path(&state_dir.join(files::CONFIG_FILE_NAME))?;
                if overrides.state_dir.is_some() && overrides.plugins_dir.is_none() {
                    config.plugins_dir = state_dir.join(files::PLUGINS_DIR_NAME);
                }
                config
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_REGISTRY_URL).filter(|v| !v.trim().is_empty()) {
            self.registry_url = url;
        }
        if let Some(dir) = lookup(ENV_PLUGINS_DIR).filter(|v| !v.trim().is_empty()) {
            self.plugins_dir = PathBuf::from(dir);
        }
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.registry_url {
            self.registry_url = url;
        }
        if let Some(state_dir) = overrides.state_dir {
            self.state_dir = state_dir;
        }
        if let Some(plugins_dir) = overrides.plugins_dir {
            self.plugins_dir = plugins_dir;
        }
        if overrides.temp_dir.is_some() {
            self.temp_dir = overrides.temp_dir;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.registry_url)
            .with_context(|| format!("invalid registry_url '{}'", self.registry_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("registry_url must be http or https, got '{}'", url.scheme());
        }
        if self.api_version.trim().is_empty() {
            bail!("api_version cannot be empty");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }
}
