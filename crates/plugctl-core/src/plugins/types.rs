use std::{borrow::Borrow, fmt, path::PathBuf, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::install;
use crate::error::PluginError;

static PLUGIN_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([_.-]?[a-z0-9]+)*/[a-z0-9]([_.-]?[a-z0-9]+)*$").unwrap()
});

/// `vendor/name` identifier, the join key across manifest, lockfile, and
/// the plugins directory layout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginKey(String);

impl PluginKey {
    pub fn parse(raw: &str) -> Result<Self, PluginError> {
        let trimmed = raw.trim();
        if PLUGIN_KEY_PATTERN.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(PluginError::InvalidPluginKey(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn vendor(&self) -> &str {
        self.0.split_once('/').map(|(v, _)| v).unwrap_or(&self.0)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }

    /// Directory of this plugin relative to the plugins root (`vendor/name`)
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.vendor()).join(self.name())
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PluginKey {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PluginKey {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PluginKey> for String {
    fn from(key: PluginKey) -> Self {
        key.0
    }
}

impl Borrow<str> for PluginKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Interpreted form of a manifest constraint.
///
/// The manifest keeps the raw string; only the installer turns it into one
/// of these to decide who resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// `null` or `"latest"`: the registry's newest published version
    Latest,
    /// `dev-*`: an exact, unversioned development ref
    Dev(String),
    /// Anything else: a semantic-version range or exact pin
    Range(String),
}

impl VersionConstraint {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Latest,
            Some(value) if value == install::LATEST => Self::Latest,
            Some(value) if value.starts_with(install::DEV_PREFIX) => Self::Dev(value.to_string()),
            Some(value) => Self::Range(value.to_string()),
        }
    }

    /// Reference the registry resolves directly, `None` meaning latest.
    /// Ranges return `None` too; check [`Self::is_range`] first.
    pub fn registry_ref(&self) -> Option<&str> {
        match self {
            Self::Dev(reference) => Some(reference),
            Self::Latest | Self::Range(_) => None,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range(_))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(install::LATEST),
            Self::Dev(value) | Self::Range(value) => f.write_str(value),
        }
    }
}
