//! Centralized path utilities
//!
//! All default application paths in one place for consistency

use std::path::PathBuf;

use crate::constants::files;

/// Get the plugctl config directory (~/.plugctl)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(files::CONFIG_DIR_NAME)
}

/// Get the logs directory (~/.plugctl/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Default JSON record log (~/.plugctl/logs/plugctl.log)
pub fn default_log_file() -> PathBuf {
    logs_dir().join("plugctl.log")
}

/// Default state directory holding plugins.json and plugins-lock.json.
/// Uses the current directory so projects carry their own manifest.
pub fn default_state_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Default plugins directory (<state dir>/plugins)
pub fn default_plugins_dir() -> PathBuf {
    default_state_dir().join(files::PLUGINS_DIR_NAME)
}
