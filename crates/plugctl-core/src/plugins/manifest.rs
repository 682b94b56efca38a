//! Declared install intent (`plugins.json`)
//!
//! Maps each plugin key to the constraint the user asked for. The
//! constraint is stored verbatim; only the resolver interprets it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use super::store::{read_json_tolerant, write_json_pretty};
use super::PluginKey;
use crate::logging::Logger;

const LABEL: &str = "manifest";

#[derive(Debug)]
pub struct PluginManifest {
    path: PathBuf,
    plugins: BTreeMap<PluginKey, Option<String>>,
    /// Carried through untouched
    repositories: Vec<serde_json::Value>,
    has_changed: bool,
    logger: Logger,
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    plugins: &'a BTreeMap<PluginKey, Option<String>>,
    repositories: &'a [serde_json::Value],
}

impl PluginManifest {
    /// Load from `path`; problems with the file degrade to an empty manifest
    pub fn load(path: impl Into<PathBuf>, logger: Logger) -> Self {
        let mut manifest = Self {
            path: path.into(),
            plugins: BTreeMap::new(),
            repositories: Vec::new(),
            has_changed: false,
            logger,
        };
        manifest.read();
        manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plugins(&self) -> &BTreeMap<PluginKey, Option<String>> {
        &self.plugins
    }

    pub fn contains(&self, key: &PluginKey) -> bool {
        self.plugins.contains_key(key)
    }

    /// `None` when the plugin is not declared, `Some(None)` for "latest"
    pub fn constraint(&self, key: &PluginKey) -> Option<Option<&str>> {
        self.plugins.get(key).map(|c| c.as_deref())
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    pub fn add_plugin(&mut self, key: PluginKey, constraint: Option<String>) {
        if self.plugins.get(&key) == Some(&constraint) {
            return;
        }

        let shown = constraint.clone().unwrap_or_else(|| "null".to_string());
        self.logger.info(
            "manifest.pluginAdded",
            "Added plugin to manifest.",
            &[("pluginKey", key.as_str()), ("constraint", &shown)],
        );
        self.plugins.insert(key, constraint);
        self.has_changed = true;
    }

    pub fn remove_plugin(&mut self, key: &PluginKey) {
        if self.plugins.remove(key).is_none() {
            return;
        }

        self.has_changed = true;
        self.logger.info(
            "manifest.pluginRemoved",
            "Removed plugin from manifest.",
            &[("pluginKey", key.as_str())],
        );
    }

    /// Replace in-memory state with the file contents. Never fails.
    pub fn read(&mut self) {
        self.plugins.clear();
        self.repositories.clear();
        self.has_changed = false;

        let Some(mut document) = read_json_tolerant(&self.path, LABEL, &self.logger) else {
            return;
        };

        if let Some(serde_json::Value::Array(repositories)) = document.remove("repositories") {
            self.repositories = repositories;
        }

        let Some(plugins) = document.remove("plugins") else {
            return;
        };
        let serde_json::Value::Object(plugins) = plugins else {
            self.logger.warning(
                "manifest.invalidPlugins",
                "\"plugins\" is not an object, ignoring it.",
                &[],
            );
            return;
        };

        for (raw_key, value) in plugins {
            let Ok(key) = PluginKey::parse(&raw_key) else {
                self.logger.warning(
                    "manifest.invalidKey",
                    "Skipping invalid plugin key.",
                    &[("pluginKey", &raw_key)],
                );
                continue;
            };

            let constraint = match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                other => {
                    self.logger.warning(
                        "manifest.invalidConstraint",
                        "Skipping plugin with a non-string constraint.",
                        &[("pluginKey", key.as_str()), ("value", &other.to_string())],
                    );
                    continue;
                }
            };
            self.plugins.insert(key, constraint);
        }
    }

    /// Serialize with sorted keys. On failure the in-memory state stays
    /// authoritative and `has_changed` remains set.
    pub fn write(&mut self) -> Result<()> {
        let document = ManifestDocument {
            plugins: &self.plugins,
            repositories: &self.repositories,
        };

        if let Err(e) = write_json_pretty(&self.path, &document) {
            self.logger.error(
                "manifest.writeError",
                format!("Could not write manifest file: {:#}", e),
                &[("filePath", &self.path.display().to_string())],
            );
            return Err(e);
        }

        self.has_changed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn key(raw: &str) -> PluginKey {
        PluginKey::parse(raw).expect("valid key")
    }

    #[test]
    fn missing_file_is_empty_with_warning() {
        let temp = tempdir().expect("tempdir");
        let sink = Arc::new(MemorySink::new());
        let manifest = PluginManifest::load(temp.path().join("plugins.json"), Logger::new(sink.clone()));

        assert!(manifest.plugins().is_empty());
        assert!(!manifest.has_changed());
        assert!(sink.has_code("manifest.readFileNotFound"));
    }

    #[test]
    fn empty_and_malformed_files_degrade() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plugins.json");
        let sink = Arc::new(MemorySink::new());

        std::fs::write(&path, "").expect("write");
        assert!(PluginManifest::load(&path, Logger::new(sink.clone())).plugins().is_empty());
        assert!(sink.has_code("manifest.readEmptyFile"));

        std::fs::write(&path, "{\"plugins\": {").expect("write");
        assert!(PluginManifest::load(&path, Logger::new(sink.clone())).plugins().is_empty());
        assert!(sink.has_code("manifest.readMalformed"));
    }

    #[test]
    fn write_is_sorted_pretty_with_trailing_newline() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plugins.json");
        let mut manifest = PluginManifest::load(&path, Logger::noop());

        manifest.add_plugin(key("zeta/last"), Some("^1.0".into()));
        manifest.add_plugin(key("acme/first"), None);
        manifest.write().expect("write manifest");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(
            written,
            "{\n    \"plugins\": {\n        \"acme/first\": null,\n        \"zeta/last\": \"^1.0\"\n    },\n    \"repositories\": []\n}\n"
        );
        assert!(!manifest.has_changed());
    }

    #[test]
    fn round_trip_preserves_entries_and_repositories() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plugins.json");
        std::fs::write(
            &path,
            r#"{"plugins": {"acme/foo": "^1.2.0", "acme/bar": null, "BAD KEY": "1"},
               "repositories": [{"type": "git", "url": "https://example.org/r.git"}]}"#,
        )
        .expect("seed");

        let mut manifest = PluginManifest::load(&path, Logger::noop());
        assert_eq!(manifest.plugins().len(), 2);
        manifest.add_plugin(key("acme/baz"), Some("dev-main".into()));
        manifest.write().expect("write");

        let reread = PluginManifest::load(&path, Logger::noop());
        assert_eq!(reread.plugins(), manifest.plugins());
        assert_eq!(reread.repositories.len(), 1);
        assert_eq!(reread.constraint(&key("acme/bar")), Some(None));
        assert_eq!(reread.constraint(&key("acme/foo")), Some(Some("^1.2.0")));
        assert_eq!(reread.constraint(&key("acme/none")), None);
    }

    #[test]
    fn add_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("plugins.json");
        let mut manifest = PluginManifest::load(&path, Logger::noop());

        manifest.add_plugin(key("acme/foo"), Some("^1.0".into()));
        assert!(manifest.has_changed());
        manifest.write().expect("write");

        manifest.add_plugin(key("acme/foo"), Some("^1.0".into()));
        assert!(!manifest.has_changed());
        assert_eq!(manifest.plugins().len(), 1);

        manifest.add_plugin(key("acme/foo"), Some("^2.0".into()));
        assert!(manifest.has_changed());
        assert_eq!(manifest.constraint(&key("acme/foo")), Some(Some("^2.0")));
    }

    #[test]
    fn remove_absent_is_noop() {
        let temp = tempdir().expect("tempdir");
        let mut manifest = PluginManifest::load(temp.path().join("plugins.json"), Logger::noop());
        manifest.remove_plugin(&key("acme/missing"));
        assert!(!manifest.has_changed());

        manifest.add_plugin(key("acme/foo"), None);
        manifest.write().expect("write");
        manifest.remove_plugin(&key("acme/foo"));
        assert!(manifest.has_changed());
        assert!(!manifest.contains(&key("acme/foo")));
    }

    #[test]
    fn write_failure_is_reported_and_state_kept() {
        let temp = tempdir().expect("tempdir");
        // A directory where the file should be makes the rename fail
        let path = temp.path().join("plugins.json");
        std::fs::create_dir_all(path.join("occupied")).expect("block path");

        let sink = Arc::new(MemorySink::new());
        let mut manifest = PluginManifest::load(&path, Logger::new(sink.clone()));
        manifest.add_plugin(key("acme/foo"), None);

        assert!(manifest.write().is_err());
        assert!(manifest.has_changed());
        assert!(manifest.contains(&key("acme/foo")));
        assert!(sink.has_code("manifest.writeError"));
    }
}
