//! Redis.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::containers::ContainerRecord;
use crate::error::ConfigError;
use crate::services::availability::{Availability, CONNECT_TIMEOUT};
use crate::services::endpoints::{Endpoint, Endpoints, Part};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ContainerProvider, ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{
    OverrideValue, Service, endpoint_error, invalid_value, parse_port, single, unknown_key,
};

pub const DEFAULT_PORT: u16 = 6379;

const IMAGE: &str = "redis";

const ALLOW_OVERRIDE: &[&str] = &["host", "port", "db_index"];

/// A single Redis server and the database index to use on it.
///
/// Stored as a `redis://host:port/db_index` endpoint.
#[derive(Debug, Clone)]
pub struct Redis {
    endpoint: Endpoints,
}

impl Redis {
    pub fn new(host: &str, port: u16, db_index: u32) -> Self {
        Self {
            endpoint: Endpoint::new("redis", host, Some(port))
                .with_name(&db_index.to_string())
                .into(),
        }
    }

    fn server(&self) -> &Endpoint {
        self.endpoint.first()
    }

    pub fn host(&self) -> &str {
        &self.server().host
    }

    pub fn port(&self) -> u16 {
        self.server().port.unwrap_or(DEFAULT_PORT)
    }

    pub fn db_index(&self) -> &str {
        self.server().name()
    }

    pub fn url(&self) -> String {
        self.endpoint.url_string()
    }

    /// Send `PING` and wait up to one second for `PONG`.
    async fn ping(&self) -> Result<(), String> {
        let addr = (self.host(), self.port());
        let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err("connection timed out".to_string()),
        };

        stream
            .write_all(b"PING\r\n")
            .await
            .map_err(|e| e.to_string())?;

        let read_pong = async {
            let mut reply = Vec::new();
            let mut buf = [0u8; 64];
            loop {
                let n = stream.read(&mut buf).await.map_err(|e| e.to_string())?;
                if n == 0 {
                    return Err("connection closed before PONG".to_string());
                }
                reply.extend_from_slice(&buf[..n]);
                if reply.windows(4).any(|w| w == b"PONG") {
                    return Ok(());
                }
            }
        };

        timeout(CONNECT_TIMEOUT, read_pong)
            .await
            .map_err(|_| "no PONG within 1s".to_string())?
    }
}

#[async_trait]
impl Service for Redis {
    fn name(&self) -> &'static str {
        "Redis"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "REDIS_HOSTS".to_string(),
                self.server().host_port_or(DEFAULT_PORT),
            ),
            ("REDIS_DB_INDEX".to_string(), self.db_index().to_string()),
        ])
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        Ok(match self.ping().await {
            Ok(()) => Availability::Ready,
            Err(reason) => Availability::Retry(format!(
                "Redis at {}:{}: {}",
                self.host(),
                self.port(),
                reason
            )),
        })
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        let endpoint = match key {
            "host" => {
                // Only one server is supported.
                let host = single(service, key, value)?;
                self.endpoint.with_part_set(Part::Host, &[host])
            }
            "port" => {
                let port = parse_port(service, key, value)?;
                self.endpoint.with_part_set(Part::Port, &[port.to_string()])
            }
            "db_index" => {
                let index = single(service, key, value)?;
                if index.parse::<u32>().is_err() {
                    return Err(invalid_value(
                        service,
                        key,
                        format!("'{index}' is not a database number"),
                    ));
                }
                self.endpoint.with_part_set(Part::Name, &[index])
            }
            _ => return Err(unknown_key(service, key)),
        };
        self.endpoint = endpoint.map_err(|e| endpoint_error(service, key, e))?;
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        let value = match key {
            "host" => self.host().to_string(),
            "port" => self.port().to_string(),
            "db_index" => self.db_index().to_string(),
            _ => return None,
        };
        Some(OverrideValue::Scalar(value))
    }
}

/// Redis on this machine's default port, database 0.
struct Localhost;

#[async_trait]
impl Provider for Localhost {
    fn name(&self) -> &'static str {
        "localhost"
    }

    async fn provide(&self, _ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        Ok(Provided::new(Redis::new("localhost", DEFAULT_PORT, 0)))
    }
}

fn build_from_container(_application_id: &str, record: &ContainerRecord) -> Box<dyn Service> {
    Box::new(Redis::new(&record.host, record.port, 0))
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("redis", "Redis")
        .with_overrides(ALLOW_OVERRIDE)
        .with_provider(Localhost)
        .with_provider(ContainerProvider::new(IMAGE, DEFAULT_PORT, build_from_container))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn fake_server(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(reply).await;
            }
        });
        port
    }

    #[test]
    fn environment_has_host_and_index() {
        let redis = Redis::new("localhost", DEFAULT_PORT, 0);
        assert_eq!(redis.url(), "redis://localhost:6379/0");
        let env = redis.environment();
        assert_eq!(env["REDIS_HOSTS"], "localhost:6379");
        assert_eq!(env["REDIS_DB_INDEX"], "0");
    }

    #[test]
    fn overrides_change_only_their_part() {
        let mut redis = Redis::new("localhost", DEFAULT_PORT, 0);
        redis.apply_override("db_index", &"3".into()).unwrap();
        redis.apply_override("host", &"cache".into()).unwrap();
        assert_eq!(redis.url(), "redis://cache:6379/3");

        redis.apply_override("port", &"6380".into()).unwrap();
        assert_eq!(redis.url(), "redis://cache:6380/3");
    }

    #[test]
    fn db_index_must_be_numeric() {
        let mut redis = Redis::new("localhost", DEFAULT_PORT, 0);
        assert!(matches!(
            redis.apply_override("db_index", &"first".into()),
            Err(ConfigError::InvalidOverrideValue { .. })
        ));
        assert!(matches!(
            redis.apply_override("host", &OverrideValue::list(["a", "b"])),
            Err(ConfigError::InvalidOverrideValue { .. })
        ));
    }

    #[tokio::test]
    async fn pong_means_ready() {
        let port = fake_server(b"+PONG\r\n").await;
        let redis = Redis::new("127.0.0.1", port, 0);
        assert_eq!(redis.check_available().await.unwrap(), Availability::Ready);
    }

    #[tokio::test]
    async fn other_reply_means_retry() {
        let port = fake_server(b"-LOADING Redis is loading the dataset in memory\r\n").await;
        let redis = Redis::new("127.0.0.1", port, 0);
        assert!(matches!(
            redis.check_available().await.unwrap(),
            Availability::Retry(_)
        ));
    }

    #[tokio::test]
    async fn refused_connection_means_retry() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let redis = Redis::new("127.0.0.1", port, 0);
        assert!(!redis.check_available().await.unwrap().is_ready());
    }
}
