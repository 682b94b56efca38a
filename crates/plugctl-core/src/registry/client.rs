use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{RegistryClient, RegistryError, Version, VersionList};
use crate::config::ManagerConfig;
use crate::constants::{self, registry};
use crate::plugins::PluginKey;

/// Connection settings injected into the HTTP client at construction
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub api_version: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl RegistryConfig {
    /// `<base_url>/api/v<api_version>`
    pub fn api_base(&self) -> String {
        format!(
            "{}/api/v{}",
            self.base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: registry::DEFAULT_URL.to_string(),
            api_version: registry::API_VERSION.to_string(),
            user_agent: constants::default_user_agent(),
            timeout: Duration::from_secs(registry::REQUEST_TIMEOUT_SECS),
        }
    }
}

impl From<&ManagerConfig> for RegistryConfig {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            base_url: config.registry_url.clone(),
            api_version: config.api_version.clone(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Registry client over the HTTP(S) API
#[derive(Clone)]
pub struct HttpRegistryClient {
    http_client: reqwest::Client,
    config: RegistryConfig,
}

impl HttpRegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| RegistryError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn url(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base(),
            route.trim_start_matches('/')
        )
    }

    async fn get_json(
        &self,
        route: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<serde_json::Value, RegistryError> {
        let url = self.url(route);
        debug!(url = %url, "Registry GET");

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::NotFound(format!(
                "{} (HTTP {})",
                what,
                status.as_u16()
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RegistryError::InvalidPayload(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_version(
        &self,
        key: &PluginKey,
        version: Option<&str>,
    ) -> Result<Version, RegistryError> {
        let version = version.unwrap_or(constants::install::LATEST);
        let json = self
            .get_json(
                &format!("/{}/v/{}", key, version),
                &[("expand[]", "plugin")],
                &format!("{}@{}", key, version),
            )
            .await?;

        let parsed = Version::from_json(json)?;
        if parsed.key() != key {
            return Err(RegistryError::InvalidPayload(format!(
                "asked for {} but registry answered with {}",
                key,
                parsed.key()
            )));
        }
        Ok(parsed)
    }

    async fn get_version_list(&self, key: &PluginKey) -> Result<VersionList, RegistryError> {
        let json = self
            .get_json(
                &format!("/{}/versions", key),
                &[],
                &format!("{} versions", key),
            )
            .await?;
        VersionList::from_json(json)
    }

    async fn increment_download(&self, key: &PluginKey, tag: &str) -> Result<(), RegistryError> {
        let url = self.url(&format!("/{}/v/{}/downloads", key, tag));
        debug!(url = %url, "Registry download increment");

        let response = self
            .http_client
            .post(&url)
            .timeout(Duration::from_secs(registry::INCREMENT_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(format!("POST {}: {}", url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::NotFound(format!(
                "{}@{} downloads (HTTP {})",
                key,
                tag,
                response.status().as_u16()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;

    const VERSION_BODY: &str = r#"{
        "plugin": {
            "key": "acme/foo",
            "repository_url": "https://git.example.org/acme/foo.git",
            "manifest_root": ""
        },
        "tag": "1.3.0",
        "commit_hash": "abc123",
        "published_at": "2024-06-01T08:30:00Z"
    }"#;

    /// Serve exactly `count` requests, recording `METHOD path` for each
    fn spawn_registry(
        count: usize,
        seen: Arc<Mutex<Vec<String>>>,
    ) -> (String, JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind test server");
        let port = server
            .server_addr()
            .to_ip()
            .expect("ip listener")
            .port();

        let handle = std::thread::spawn(move || {
            for _ in 0..count {
                let request = server.recv().expect("receive request");
                let path = request.url().split('?').next().unwrap_or("").to_string();
                seen.lock()
                    .expect("seen lock")
                    .push(format!("{} {}", request.method(), request.url()));

                let (status, body) = match path.as_str() {
                    "/api/v1/acme/foo/v/latest" | "/api/v1/acme/foo/v/1.3.0" => (200, VERSION_BODY),
                    "/api/v1/acme/foo/versions" => (
                        200,
                        r#"{"plugin": "acme/foo", "latest": "1.3.0", "all_tags": ["1.2.0", "1.3.0"]}"#,
                    ),
                    "/api/v1/acme/foo/v/1.3.0/downloads" => (200, "{}"),
                    _ => (404, r#"{"error": "not found"}"#),
                };
                let response = tiny_http::Response::from_string(body).with_status_code(status);
                let _ = request.respond(response);
            }
        });

        (format!("http://127.0.0.1:{}", port), handle)
    }

    fn client_for(base_url: String) -> HttpRegistryClient {
        HttpRegistryClient::new(RegistryConfig {
            base_url,
            ..RegistryConfig::default()
        })
        .expect("build client")
    }

    #[tokio::test]
    async fn fetches_versions_and_lists() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (base_url, handle) = spawn_registry(3, seen.clone());
        let client = client_for(base_url);
        let key = PluginKey::parse("acme/foo").expect("key");

        let latest = client.get_version(&key, None).await.expect("latest version");
        assert_eq!(latest.tag, "1.3.0");
        assert_eq!(latest.commit_hash, "abc123");

        let list = client.get_version_list(&key).await.expect("version list");
        assert_eq!(list.all_tags, vec!["1.2.0", "1.3.0"]);

        client
            .increment_download(&key, "1.3.0")
            .await
            .expect("increment");

        handle.join().expect("server thread");
        let seen = seen.lock().expect("seen lock");
        assert!(seen[0].starts_with("GET /api/v1/acme/foo/v/latest?expand"));
        assert!(seen[1].starts_with("GET /api/v1/acme/foo/versions"));
        assert_eq!(seen[2], "POST /api/v1/acme/foo/v/1.3.0/downloads");
    }

    #[tokio::test]
    async fn non_success_status_is_not_found() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (base_url, handle) = spawn_registry(1, seen);
        let client = client_for(base_url);
        let key = PluginKey::parse("acme/missing").expect("key");

        let err = client
            .get_version(&key, Some("9.9.9"))
            .await
            .expect_err("missing version");
        assert!(matches!(err, RegistryError::NotFound(_)), "got {:?}", err);
        handle.join().expect("server thread");
    }

    #[tokio::test]
    async fn unreachable_registry_is_unavailable() {
        // Bind then drop to get a port with nothing listening
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr")
            .port();
        let client = client_for(format!("http://127.0.0.1:{}", port));
        let key = PluginKey::parse("acme/foo").expect("key");

        let err = client
            .get_version_list(&key)
            .await
            .expect_err("nothing listening");
        assert!(matches!(err, RegistryError::Unavailable(_)), "got {:?}", err);
    }

    #[test]
    fn api_base_joins_version() {
        let config = RegistryConfig {
            base_url: "https://plugins.example.org/".into(),
            ..RegistryConfig::default()
        };
        assert_eq!(config.api_base(), "https://plugins.example.org/api/v1");
    }
}
