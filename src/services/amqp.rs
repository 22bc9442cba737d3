//! AMQP message broker (RabbitMQ).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::containers::ContainerRecord;
use crate::error::ConfigError;
use crate::services::availability::{Availability, any_reachable};
use crate::services::endpoints::{Endpoint, Endpoints, Part};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ContainerProvider, ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{
    OverrideValue, Service, endpoint_error, invalid_value, single, unknown_key,
};

pub const DEFAULT_PORT: u16 = 5672;

const IMAGE: &str = "rabbitmq";

/// Credentials the stock image ships with.
const CONTAINER_USER: &str = "guest";

const ALLOW_OVERRIDE: &[&str] = &["host", "vhost"];
const ALLOW_OVERRIDE_LIST: &[&str] = &["hosts", "urls"];

/// One or more brokers serving the same virtual host.
#[derive(Debug, Clone)]
pub struct Amqp {
    urls: Endpoints,
}

impl Amqp {
    pub fn new(urls: Endpoints) -> Self {
        Self { urls }
    }

    pub fn urls(&self) -> &Endpoints {
        &self.urls
    }

    pub fn vhost(&self) -> &str {
        self.urls.first().name()
    }

    /// `host:port` of every broker.
    pub fn hosts(&self) -> Vec<String> {
        self.urls.host_infos(DEFAULT_PORT)
    }
}

#[async_trait]
impl Service for Amqp {
    fn name(&self) -> &'static str {
        "RabbitMQ"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("AMQP_URLS".to_string(), self.urls.url_string())])
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        if any_reachable(&self.urls, DEFAULT_PORT).await {
            return Ok(Availability::Ready);
        }
        Ok(Availability::Retry(
            "RabbitMQ not available: none of the hosts are up".to_string(),
        ))
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        let urls = match key {
            "host" | "hosts" => self.urls.with_part_set(Part::Host, &value.values()),
            // The vhost keeps its trailing slash, as in `amqp://host/app/`.
            "vhost" => self
                .urls
                .with_part_set(Part::Name, &[single(service, key, value)?]),
            "urls" => {
                let urls = value.values();
                if urls.is_empty() {
                    return Err(invalid_value(service, key, "at least one URL is required"));
                }
                Endpoints::from_urls(&urls)
            }
            _ => return Err(unknown_key(service, key)),
        };
        self.urls = urls.map_err(|e| endpoint_error(service, key, e))?;
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        match key {
            "host" => Some(OverrideValue::Scalar(self.urls.part(Part::Host))),
            "vhost" => Some(OverrideValue::scalar(self.vhost())),
            "hosts" => Some(OverrideValue::List(self.hosts())),
            "urls" => Some(OverrideValue::List(
                self.urls.iter().map(ToString::to_string).collect(),
            )),
            _ => None,
        }
    }
}

/// The broker on this machine, with a virtual host named after the
/// application.
struct Localhost;

#[async_trait]
impl Provider for Localhost {
    fn name(&self) -> &'static str {
        "localhost"
    }

    async fn provide(&self, ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        let url = Endpoint::new("amqp", "localhost", Some(DEFAULT_PORT))
            .with_name(&format!("{}/", ctx.application_id));
        Ok(Provided::new(Amqp::new(url.into())))
    }
}

/// The container's default vhost is `/`, which serializes as `//`.
fn build_from_container(_application_id: &str, record: &ContainerRecord) -> Box<dyn Service> {
    let url = Endpoint::new("amqp", record.host.clone(), Some(record.port))
        .with_credentials(CONTAINER_USER, CONTAINER_USER)
        .with_name("/");
    Box::new(Amqp::new(url.into()))
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("amqp", "RabbitMQ")
        .with_overrides(ALLOW_OVERRIDE)
        .with_list_overrides(ALLOW_OVERRIDE_LIST)
        .with_provider(Localhost)
        .with_provider(ContainerProvider::new(IMAGE, DEFAULT_PORT, build_from_container))
}
