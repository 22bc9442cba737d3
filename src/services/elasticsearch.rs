//! Elasticsearch.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::containers::ContainerRecord;
use crate::error::ConfigError;
use crate::services::availability::Availability;
use crate::services::endpoints::{Endpoint, Endpoints, Part};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ContainerProvider, ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{
    OverrideValue, Service, endpoint_error, invalid_value, single, unknown_key,
};

pub const DEFAULT_PORT: u16 = 9200;

const IMAGE: &str = "dockerfile/elasticsearch";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration written into the container's data directory.
const CONTAINER_CONFIG: &str = "path:\n    data: /data/data\n    logs: /data/log\n";

const ALLOW_OVERRIDE: &[&str] = &["index_name", "host"];
const ALLOW_OVERRIDE_LIST: &[&str] = &["urls"];

/// An Elasticsearch cluster and the index the application should use.
#[derive(Debug, Clone)]
pub struct Elasticsearch {
    pub index_name: String,
    pub urls: Endpoints,
}

impl Elasticsearch {
    pub fn new(index_name: impl Into<String>, urls: Endpoints) -> Self {
        Self {
            index_name: index_name.into(),
            urls,
        }
    }

    /// Query one node and classify the answer.
    async fn probe(client: &reqwest::Client, url: &str) -> Availability {
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Availability::Fatal(format!("Invalid Elasticsearch URL {url}: {e}"));
            }
            Err(e) => return Availability::Retry(format!("{url}: {e}")),
        };

        let http_status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return Availability::Retry(format!("{url}: unreadable response: {e}")),
        };

        // Older servers report the status in the body; newer ones only in HTTP.
        let status = body
            .get("status")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(u64::from(http_status.as_u16()));
        if status != 200 {
            let error = body
                .get("error")
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Availability::Retry(format!(
                "Provider 'Elasticsearch' is not yet available: HTTP response {status}\n{error}"
            ));
        }
        Availability::Ready
    }
}

#[async_trait]
impl Service for Elasticsearch {
    fn name(&self) -> &'static str {
        "Elasticsearch"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "ELASTICSEARCH_INDEX_NAME".to_string(),
                self.index_name.clone(),
            ),
            ("ELASTICSEARCH_URLS".to_string(), self.urls.url_string()),
        ])
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Probe(e.to_string()))?;

        for endpoint in &self.urls {
            let availability = Self::probe(&client, &endpoint.to_string()).await;
            if !availability.is_ready() {
                return Ok(availability);
            }
        }
        Ok(Availability::Ready)
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        match key {
            "index_name" => self.index_name = single(service, key, value)?,
            "host" => {
                self.urls = self
                    .urls
                    .with_part_set(Part::Host, &value.values())
                    .map_err(|e| endpoint_error(service, key, e))?;
            }
            "urls" => {
                let urls = value.values();
                if urls.is_empty() {
                    return Err(invalid_value(service, key, "at least one URL is required"));
                }
                self.urls = Endpoints::from_urls(&urls).map_err(|e| endpoint_error(service, key, e))?;
            }
            _ => return Err(unknown_key(service, key)),
        }
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        match key {
            "index_name" => Some(OverrideValue::Scalar(self.index_name.clone())),
            "host" => Some(OverrideValue::Scalar(self.urls.part(Part::Host))),
            "urls" => Some(OverrideValue::List(
                self.urls.iter().map(ToString::to_string).collect(),
            )),
            _ => None,
        }
    }
}

fn node(host: &str, port: u16) -> Endpoints {
    Endpoint::new("http", host, Some(port)).into()
}

/// Elasticsearch on this machine's default port.
struct Localhost;

#[async_trait]
impl Provider for Localhost {
    fn name(&self) -> &'static str {
        "localhost"
    }

    async fn provide(&self, ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        Ok(Provided::new(Elasticsearch::new(
            ctx.application_id.clone(),
            node("localhost", DEFAULT_PORT),
        )))
    }
}

fn write_container_config(cache_dir: &Path) -> std::io::Result<()> {
    let path = cache_dir.join("elasticsearch.yml");
    tracing::debug!("Writing Elasticsearch config to '{}'", path.display());
    std::fs::write(path, CONTAINER_CONFIG)
}

fn build_from_container(application_id: &str, record: &ContainerRecord) -> Box<dyn Service> {
    Box::new(Elasticsearch::new(
        application_id,
        node(&record.host, record.port),
    ))
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("elasticsearch", "Elasticsearch")
        .with_overrides(ALLOW_OVERRIDE)
        .with_list_overrides(ALLOW_OVERRIDE_LIST)
        .with_provider(Localhost)
        .with_provider(
            ContainerProvider::new(IMAGE, DEFAULT_PORT, build_from_container)
                .with_data_dir("/data")
                .with_prepare(write_container_config)
                .wait_until_ready(),
        )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn es(urls: &str) -> Elasticsearch {
        Elasticsearch::new("idx", Endpoints::parse(urls).unwrap())
    }

    /// Serve one canned HTTP response per connection.
    async fn serve(status_line: &'static str, body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    #[test]
    fn environment_lists_every_url() {
        let service = es("http://a:9200|http://b:9200");
        assert_eq!(
            service.environment(),
            BTreeMap::from([
                ("ELASTICSEARCH_INDEX_NAME".to_string(), "idx".to_string()),
                (
                    "ELASTICSEARCH_URLS".to_string(),
                    "http://a:9200|http://b:9200".to_string()
                ),
            ])
        );
    }

    #[test]
    fn setting_host_collapses_to_single_endpoint() {
        let mut service = es("http://a:9200|http://b:9200");
        service.apply_override("host", &"c".into()).unwrap();
        assert_eq!(service.environment()["ELASTICSEARCH_URLS"], "http://c:9200");
        assert_eq!(service.get_override("host"), Some(OverrideValue::scalar("c")));
    }

    #[test]
    fn urls_override_accepts_lists_and_pipes() {
        let mut service = es("http://localhost:9200");
        service
            .apply_override("urls", &OverrideValue::list(["http://x:9200", "http://y:9201"]))
            .unwrap();
        assert_eq!(service.urls.url_string(), "http://x:9200|http://y:9201");

        service
            .apply_override("urls", &"http://p:1|http://q:2".into())
            .unwrap();
        assert_eq!(service.urls.len(), 2);

        assert!(matches!(
            service.apply_override("urls", &"not a url".into()),
            Err(ConfigError::InvalidOverrideValue { .. })
        ));
    }

    #[tokio::test]
    async fn green_cluster_is_ready() {
        let port = serve("200 OK", r#"{"status": 200, "name": "node"}"#).await;
        let service = es(&format!("http://127.0.0.1:{port}"));
        assert_eq!(service.check_available().await.unwrap(), Availability::Ready);
    }

    #[tokio::test]
    async fn body_without_status_uses_http_status() {
        let port = serve("200 OK", r#"{"cluster_name": "dev"}"#).await;
        let service = es(&format!("http://127.0.0.1:{port}"));
        assert!(service.check_available().await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn starting_cluster_is_retried() {
        let port = serve(
            "503 Service Unavailable",
            r#"{"status": 503, "error": "initializing"}"#,
        )
        .await;
        let service = es(&format!("http://127.0.0.1:{port}"));
        let availability = service.check_available().await.unwrap();
        assert!(matches!(availability, Availability::Retry(ref r) if r.contains("503")));
    }

    #[tokio::test]
    async fn refused_connection_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = es(&format!("http://127.0.0.1:{port}"));
        assert!(matches!(
            service.check_available().await.unwrap(),
            Availability::Retry(_)
        ));
    }

    #[test]
    fn container_config_sets_data_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_container_config(dir.path()).unwrap();
        let written = std::fs::read_to_string(dir.path().join("elasticsearch.yml")).unwrap();
        let parsed: serde_yml::Value = serde_yml::from_str(&written).unwrap();
        assert_eq!(parsed["path"]["data"].as_str(), Some("/data/data"));
        assert_eq!(parsed["path"]["logs"].as_str(), Some("/data/log"));
    }
}
