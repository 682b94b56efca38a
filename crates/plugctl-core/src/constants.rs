//! Shared constants

/// Registry defaults
pub mod registry {
    pub const DEFAULT_URL: &str = "https://plugins.castopod.org";
    pub const API_VERSION: &str = "1";
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    /// Timeout for the best-effort download counter call
    pub const INCREMENT_TIMEOUT_SECS: u64 = 5;
    /// First try plus one retry
    pub const INCREMENT_ATTEMPTS: u32 = 2;
}

/// On-disk layout
pub mod files {
    pub const CONFIG_DIR_NAME: &str = ".plugctl";
    pub const CONFIG_FILE_NAME: &str = "plugctl.toml";
    pub const MANIFEST_FILE_NAME: &str = "plugins.json";
    pub const LOCKFILE_FILE_NAME: &str = "plugins-lock.json";
    pub const PLUGINS_DIR_NAME: &str = "plugins";
    pub const LOCKFILE_VERSION: &str = "1.0";
    pub const TEMP_PREFIX: &str = "plugctl-plugin_";
    pub const STAGING_PREFIX: &str = ".plugctl-staging-";
}

/// Installer defaults
pub mod install {
    pub const DEFAULT_CONCURRENCY: usize = 4;
    /// Constraint value resolved by the registry itself
    pub const LATEST: &str = "latest";
    /// Prefix marking an unversioned development ref
    pub const DEV_PREFIX: &str = "dev-";
}

pub fn default_user_agent() -> String {
    format!("plugctl/{}", env!("CARGO_PKG_VERSION"))
}
