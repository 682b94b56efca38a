//! Resolved install state (`plugins-lock.json`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::store::{read_json_tolerant, write_json_pretty};
use super::PluginKey;
use crate::constants::files;
use crate::logging::Logger;
use crate::registry::Version;

const LABEL: &str = "lockfile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSource {
    pub url: String,
    /// Commit hash or ref the install was checked out from
    pub reference: String,
    /// Plugin subfolder inside the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDist {
    pub url: String,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    pub source: LockSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<LockDist>,
}

impl LockEntry {
    /// `dist` is only recorded when the archive was what got installed
    pub fn from_version(version: &Version, dist: Option<LockDist>) -> Self {
        let path = Some(version.plugin.manifest_root.clone()).filter(|p| !p.is_empty());
        Self {
            version: version.tag.clone(),
            source: LockSource {
                url: version.plugin.repository_url.clone(),
                reference: version.commit_hash.clone(),
                path,
            },
            dist,
        }
    }

    /// Same tag and same source reference. `dist` is metadata and is not
    /// compared.
    pub fn same_resolution(&self, version: &Version) -> bool {
        self.version == version.tag && self.source.reference == version.commit_hash
    }

    fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.version.trim().is_empty() {
            return Err("empty version");
        }
        if self.source.reference.trim().is_empty() {
            return Err("empty source reference");
        }
        if self.source.url.trim().is_empty() {
            return Err("empty source url");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
    plugins: BTreeMap<PluginKey, LockEntry>,
    has_changed: bool,
    logger: Logger,
}

#[derive(Serialize)]
struct LockfileDocument<'a> {
    version: &'a str,
    plugins: &'a BTreeMap<PluginKey, LockEntry>,
}

impl Lockfile {
    pub fn load(path: impl Into<PathBuf>, logger: Logger) -> Self {
        let mut lockfile = Self {
            path: path.into(),
            plugins: BTreeMap::new(),
            has_changed: false,
            logger,
        };
        lockfile.read();
        lockfile
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plugins(&self) -> &BTreeMap<PluginKey, LockEntry> {
        &self.plugins
    }

    pub fn get(&self, key: &PluginKey) -> Option<&LockEntry> {
        self.plugins.get(key)
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    pub fn add_plugin(&mut self, key: PluginKey, entry: LockEntry) {
        if self.plugins.get(&key) == Some(&entry) {
            return;
        }

        self.logger.info(
            "lockfile.pluginLocked",
            "Locked plugin version.",
            &[("pluginKey", key.as_str()), ("version", &entry.version)],
        );
        self.plugins.insert(key, entry);
        self.has_changed = true;
    }

    pub fn remove_plugin(&mut self, key: &PluginKey) {
        if self.plugins.remove(key).is_none() {
            return;
        }

        self.has_changed = true;
        self.logger.info(
            "lockfile.pluginRemoved",
            "Removed plugin from lockfile.",
            &[("pluginKey", key.as_str())],
        );
    }

    /// Replace in-memory state with the file contents. Never fails; entries
    /// that do not validate are dropped with a warning.
    pub fn read(&mut self) {
        self.plugins.clear();
        self.has_changed = false;

        let Some(mut document) = read_json_tolerant(&self.path, LABEL, &self.logger) else {
            return;
        };

        match document.get("version").and_then(|v| v.as_str()) {
            Some(files::LOCKFILE_VERSION) => {}
            other => {
                let found = other.unwrap_or("none").to_string();
                self.logger.warning(
                    "lockfile.unknownVersion",
                    "Unexpected lockfile format version, reading it anyway.",
                    &[("version", &found)],
                );
            }
        }

        let Some(serde_json::Value::Object(plugins)) = document.remove("plugins") else {
            return;
        };

        for (raw_key, value) in plugins {
            let Ok(key) = PluginKey::parse(&raw_key) else {
                self.invalid_entry(&raw_key, "invalid plugin key");
                continue;
            };

            let entry: LockEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    self.invalid_entry(&raw_key, &e.to_string());
                    continue;
                }
            };
            if let Err(reason) = entry.validate() {
                self.invalid_entry(&raw_key, reason);
                continue;
            }

            self.plugins.insert(key, entry);
        }
    }

    fn invalid_entry(&self, key: &str, reason: &str) {
        self.logger.warning(
            "lockfile.invalidEntry",
            "Skipping invalid lockfile entry.",
            &[("pluginKey", key), ("reason", reason)],
        );
    }

    pub fn write(&mut self) -> Result<()> {
        let document = LockfileDocument {
            version: files::LOCKFILE_VERSION,
            plugins: &self.plugins,
        };

        if let Err(e) = write_json_pretty(&self.path, &document) {
            self.logger.error(
                "lockfile.writeError",
                format!("Could not write lockfile: {:#}", e),
                &[("filePath", &self.path.display().to_string())],
            );
            return Err(e);
        }

        self.has_changed = false;
        Ok(())
    }
}
