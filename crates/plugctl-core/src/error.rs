//! Error taxonomy for plugin operations

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::RegistryError;

/// Failure of a single plugin operation.
///
/// Resolution and verification failures abort the operation for one plugin
/// and never mutate the manifest or the lockfile.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid plugin key '{0}' (expected vendor/name)")]
    InvalidPluginKey(String),

    #[error("invalid version constraint '{constraint}' for {key}: {reason}")]
    InvalidConstraint {
        key: String,
        constraint: String,
        reason: String,
    },

    #[error("no version of {key} satisfies '{constraint}'")]
    NoSatisfyingVersion { key: String, constraint: String },

    #[error("{key} is not declared in the manifest. Have you added it?")]
    PluginNotDeclared { key: String },

    #[error("{key} is declared but not installed. Run install first")]
    NotInstalled { key: String },

    #[error("registry unavailable while looking up {key}: {reason}")]
    RegistryUnavailable { key: String, reason: String },

    #[error("version '{version}' of {key} was not found in the registry")]
    VersionNotFound { key: String, version: String },

    #[error("failed to fetch {key}@{version}: {reason}")]
    FetchFailed {
        key: String,
        version: String,
        reason: String,
    },

    #[error("checksum mismatch for {key}@{version}: expected {expected}, got {actual}")]
    CorruptArtifact {
        key: String,
        version: String,
        expected: String,
        actual: String,
    },

    #[error("directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("failed to write {key} into {}: {source}", path.display())]
    InstallWriteFailed {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Stable short code, used as the log record code for failures
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPluginKey(_) => "invalidPluginKey",
            Self::InvalidConstraint { .. } => "invalidConstraint",
            Self::NoSatisfyingVersion { .. } => "noSatisfyingVersion",
            Self::PluginNotDeclared { .. } => "pluginNotDeclared",
            Self::NotInstalled { .. } => "notInstalled",
            Self::RegistryUnavailable { .. } => "registryUnavailable",
            Self::VersionNotFound { .. } => "versionNotFound",
            Self::FetchFailed { .. } => "fetchFailed",
            Self::CorruptArtifact { .. } => "corruptArtifact",
            Self::DirectoryNotFound { .. } => "directoryNotFound",
            Self::InstallWriteFailed { .. } => "installWriteFailed",
            Self::Io(_) => "io",
        }
    }

    /// Map a registry failure for `key`/`version` into the plugin taxonomy
    pub(crate) fn from_registry(key: &str, version: &str, err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::VersionNotFound {
                key: key.to_string(),
                version: version.to_string(),
            },
            RegistryError::Unavailable(reason) | RegistryError::InvalidPayload(reason) => {
                Self::RegistryUnavailable {
                    key: key.to_string(),
                    reason,
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
