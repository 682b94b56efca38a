//! plugctl core library
//!
//! Resolves, fetches, verifies, and installs versioned plugin packages from a
//! remote plugin registry, keeping the declared manifest (`plugins.json`) and
//! the resolved lockfile (`plugins-lock.json`) consistent with the plugins
//! directory on disk.

pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod paths;
pub mod plugins;
pub mod registry;

pub use config::ManagerConfig;
pub use error::{PluginError, Result};
pub use logging::{Logger, Severity};
pub use plugins::PluginManager;
