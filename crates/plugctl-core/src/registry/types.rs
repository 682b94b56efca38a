use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::RegistryError;
use crate::plugins::PluginKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
    pub url: Option<String>,
}

/// Registry metadata for a plugin, independent of any release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub key: PluginKey,
    pub vendor: String,
    pub name: String,
    pub description: String,
    pub repository_url: String,
    /// Subfolder of the repository holding the plugin ("" for the root)
    pub manifest_root: String,
    pub homepage_url: Option<String>,
    pub categories: Vec<String>,
    pub authors: Vec<Author>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Immutable snapshot of one published release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub plugin: PluginInfo,
    pub tag: String,
    pub commit_hash: String,
    pub archive_url: Option<String>,
    pub archive_checksum: Option<String>,
    pub readme: Option<String>,
    pub license: Option<String>,
    pub min_host_version: Option<String>,
    pub hooks: Vec<String>,
    pub size: u64,
    pub file_count: u64,
    pub published_at: Option<DateTime<Utc>>,
}

impl Version {
    pub fn key(&self) -> &PluginKey {
        &self.plugin.key
    }

    /// Parse and validate a registry payload
    pub fn from_json(value: serde_json::Value) -> Result<Self, RegistryError> {
        let raw: RawVersion = serde_json::from_value(value)
            .map_err(|e| RegistryError::InvalidPayload(format!("version: {}", e)))?;
        Self::try_from(raw)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionList {
    pub plugin: String,
    pub latest: String,
    pub all_tags: Vec<String>,
}

impl VersionList {
    pub fn from_json(value: serde_json::Value) -> Result<Self, RegistryError> {
        let raw: RawVersionList = serde_json::from_value(value)
            .map_err(|e| RegistryError::InvalidPayload(format!("version list: {}", e)))?;

        let plugin = match raw.plugin {
            Some(RawPluginRef::Key(key)) => key,
            Some(RawPluginRef::Expanded(plugin)) => plugin.key,
            None => String::new(),
        };

        Ok(Self {
            plugin,
            latest: raw.latest.unwrap_or_default(),
            all_tags: raw.all_tags,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlugin {
    key: String,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    repository_url: Option<String>,
    #[serde(default)]
    manifest_root: Option<String>,
    #[serde(default)]
    homepage_url: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    authors: Vec<RawAuthor>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPluginRef {
    Expanded(Box<RawPlugin>),
    Key(String),
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    #[serde(default)]
    plugin: Option<RawPluginRef>,
    tag: String,
    commit_hash: String,
    #[serde(default)]
    archive_url: Option<String>,
    #[serde(default)]
    archive_checksum: Option<String>,
    #[serde(default)]
    readme: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default, alias = "min_castopod_version")]
    min_host_version: Option<String>,
    #[serde(default)]
    hooks: Vec<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    file_count: u64,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVersionList {
    #[serde(default)]
    plugin: Option<RawPluginRef>,
    #[serde(default)]
    latest: Option<String>,
    #[serde(default)]
    all_tags: Vec<String>,
}

impl TryFrom<RawPlugin> for PluginInfo {
    type Error = RegistryError;

    fn try_from(raw: RawPlugin) -> Result<Self, Self::Error> {
        let key = PluginKey::parse(&raw.key)
            .map_err(|_| RegistryError::InvalidPayload(format!("plugin key '{}'", raw.key)))?;

        let repository_url = non_empty(raw.repository_url)
            .ok_or_else(|| invalid(&key, "plugin.repository_url is missing"))?;

        Ok(Self {
            vendor: non_empty(raw.vendor).unwrap_or_else(|| key.vendor().to_string()),
            name: non_empty(raw.name).unwrap_or_else(|| key.name().to_string()),
            description: raw.description.unwrap_or_default(),
            repository_url,
            manifest_root: raw
                .manifest_root
                .map(|root| root.trim_matches('/').to_string())
                .unwrap_or_default(),
            homepage_url: non_empty(raw.homepage_url),
            categories: raw.categories,
            authors: raw
                .authors
                .into_iter()
                .map(|a| Author {
                    name: a.name,
                    email: non_empty(a.email),
                    url: non_empty(a.url),
                })
                .collect(),
            created_at: parse_timestamp(raw.created_at.as_deref())
                .map_err(|e| invalid(&key, &format!("plugin.created_at: {}", e)))?,
            updated_at: parse_timestamp(raw.updated_at.as_deref())
                .map_err(|e| invalid(&key, &format!("plugin.updated_at: {}", e)))?,
            key,
        })
    }
}

impl TryFrom<RawVersion> for Version {
    type Error = RegistryError;

    fn try_from(raw: RawVersion) -> Result<Self, Self::Error> {
        let plugin = match raw.plugin {
            Some(RawPluginRef::Expanded(plugin)) => PluginInfo::try_from(*plugin)?,
            Some(RawPluginRef::Key(key)) => {
                return Err(RegistryError::InvalidPayload(format!(
                    "version of '{}' does not embed plugin details",
                    key
                )))
            }
            None => {
                return Err(RegistryError::InvalidPayload(
                    "version payload has no plugin".to_string(),
                ))
            }
        };

        if raw.tag.trim().is_empty() {
            return Err(invalid(&plugin.key, "tag cannot be empty"));
        }
        if raw.commit_hash.trim().is_empty() {
            return Err(invalid(&plugin.key, "commit_hash cannot be empty"));
        }

        let published_at = parse_timestamp(raw.published_at.as_deref())
            .map_err(|e| invalid(&plugin.key, &format!("published_at: {}", e)))?;

        Ok(Self {
            plugin,
            tag: raw.tag,
            commit_hash: raw.commit_hash,
            archive_url: non_empty(raw.archive_url),
            archive_checksum: non_empty(raw.archive_checksum).map(|c| c.to_lowercase()),
            readme: raw.readme,
            license: non_empty(raw.license),
            min_host_version: non_empty(raw.min_host_version),
            hooks: raw.hooks,
            size: raw.size,
            file_count: raw.file_count,
            published_at,
        })
    }
}

fn invalid(key: &PluginKey, detail: &str) -> RegistryError {
    RegistryError::InvalidPayload(format!("{}: {}", key, detail))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// RFC 3339, or the `Y-m-d H:M:S` form some registries emit (read as UTC)
fn parse_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| format!("'{}' is not a timestamp ({})", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version_payload() -> serde_json::Value {
        json!({
            "plugin": {
                "key": "ad-aures/podcast-license",
                "vendor": "ad-aures",
                "name": "podcast-license",
                "description": "Adds a license to podcasts",
                "repository_url": "https://code.example.org/ad-aures/plugins.git",
                "manifest_root": "/podcast-license/",
                "homepage_url": null,
                "categories": ["metadata"],
                "authors": [{"name": "Ad Aures", "email": "", "url": "https://adaures.com"}],
                "created_at": "2024-05-01T10:00:00+00:00",
                "updated_at": "2024-06-01 08:30:00"
            },
            "tag": "1.3.0",
            "commit_hash": "abc123",
            "archive_url": "https://plugins.example.org/a.zip",
            "archive_checksum": "ABCDEF",
            "readme": "# readme",
            "license": "MIT",
            "min_castopod_version": "2.0.0",
            "hooks": ["rssBeforeChannel"],
            "size": 1024,
            "file_count": 3,
            "published_at": "2024-06-01T08:30:00Z"
        })
    }

    #[test]
    fn parses_full_version_payload() {
        let version = Version::from_json(version_payload()).expect("valid payload");

        assert_eq!(version.key().as_str(), "ad-aures/podcast-license");
        assert_eq!(version.plugin.manifest_root, "podcast-license");
        assert_eq!(version.plugin.homepage_url, None);
        assert_eq!(version.plugin.authors[0].email, None);
        assert_eq!(version.min_host_version.as_deref(), Some("2.0.0"));
        assert_eq!(version.archive_checksum.as_deref(), Some("abcdef"));
        assert!(version.plugin.updated_at.is_some());
        assert_eq!(version.to_string(), "1.3.0");
    }

    #[test]
    fn rejects_missing_required_fields() {
        let mut payload = version_payload();
        payload["commit_hash"] = json!("");
        assert!(matches!(
            Version::from_json(payload),
            Err(RegistryError::InvalidPayload(_))
        ));

        let mut payload = version_payload();
        payload["plugin"] = json!("ad-aures/podcast-license");
        assert!(matches!(
            Version::from_json(payload),
            Err(RegistryError::InvalidPayload(_))
        ));

        let mut payload = version_payload();
        payload["plugin"]["key"] = json!("Not A Key");
        assert!(Version::from_json(payload).is_err());

        let mut payload = version_payload();
        payload["published_at"] = json!("yesterday");
        assert!(Version::from_json(payload).is_err());
    }

    #[test]
    fn version_list_accepts_plain_plugin_key() {
        let list = VersionList::from_json(json!({
            "plugin": "acme/foo",
            "latest": "2.0.0",
            "all_tags": ["1.0.0", "2.0.0", "dev-main"]
        }))
        .expect("valid list");

        assert_eq!(list.plugin, "acme/foo");
        assert_eq!(list.latest, "2.0.0");
        assert_eq!(list.all_tags.len(), 3);
    }
}
