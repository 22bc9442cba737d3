//! Memcache.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::containers::ContainerRecord;
use crate::error::ConfigError;
use crate::services::availability::{Availability, any_reachable};
use crate::services::endpoints::{DELIMITER, Endpoint, Endpoints, Part};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ContainerProvider, ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{
    OverrideValue, Service, endpoint_error, invalid_value, single, unknown_key,
};

pub const DEFAULT_PORT: u16 = 11211;

const IMAGE: &str = "memcached";

const ALLOW_OVERRIDE: &[&str] = &["key_prefix", "host"];
const ALLOW_OVERRIDE_LIST: &[&str] = &["hosts", "urls"];

/// A pool of memcached servers sharing a key prefix.
///
/// Stored as `memcache://host:port/prefix` endpoints.
#[derive(Debug, Clone)]
pub struct Memcache {
    endpoints: Endpoints,
}

impl Memcache {
    pub fn new(key_prefix: &str, host: &str, port: u16) -> Self {
        Self {
            endpoints: Endpoint::new("memcache", host, Some(port))
                .with_name(key_prefix)
                .into(),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn key_prefix(&self) -> &str {
        self.endpoints.first().name()
    }

    /// `host:port` of every server.
    pub fn hosts(&self) -> Vec<String> {
        self.endpoints.host_infos(DEFAULT_PORT)
    }
}

#[async_trait]
impl Service for Memcache {
    fn name(&self) -> &'static str {
        "Memcache"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("MEMCACHE_HOSTS".to_string(), self.hosts().join(DELIMITER)),
            ("MEMCACHE_PREFIX".to_string(), self.key_prefix().to_string()),
        ])
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        if any_reachable(&self.endpoints, DEFAULT_PORT).await {
            return Ok(Availability::Ready);
        }
        Ok(Availability::Retry(
            "Memcached not available: none of the hosts are up".to_string(),
        ))
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        let endpoints = match key {
            "key_prefix" => self
                .endpoints
                .with_part_set(Part::Name, &[single(service, key, value)?]),
            "host" | "hosts" => self.endpoints.with_part_set(Part::Host, &value.values()),
            "urls" => {
                let urls = value.values();
                if urls.is_empty() {
                    return Err(invalid_value(service, key, "at least one URL is required"));
                }
                Endpoints::from_urls(&urls)
            }
            _ => return Err(unknown_key(service, key)),
        };
        self.endpoints = endpoints.map_err(|e| endpoint_error(service, key, e))?;
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        match key {
            "key_prefix" => Some(OverrideValue::scalar(self.key_prefix())),
            "host" => Some(OverrideValue::Scalar(self.endpoints.part(Part::Host))),
            "hosts" => Some(OverrideValue::List(self.hosts())),
            "urls" => Some(OverrideValue::List(
                self.endpoints.iter().map(ToString::to_string).collect(),
            )),
            _ => None,
        }
    }
}

/// memcached on this machine's default port.
struct Localhost;

#[async_trait]
impl Provider for Localhost {
    fn name(&self) -> &'static str {
        "localhost"
    }

    async fn provide(&self, ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        Ok(Provided::new(Memcache::new(
            &ctx.application_id,
            "localhost",
            DEFAULT_PORT,
        )))
    }
}

fn build_from_container(application_id: &str, record: &ContainerRecord) -> Box<dyn Service> {
    Box::new(Memcache::new(application_id, &record.host, record.port))
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("memcache", "Memcache")
        .with_overrides(ALLOW_OVERRIDE)
        .with_list_overrides(ALLOW_OVERRIDE_LIST)
        .with_provider(Localhost)
        .with_provider(ContainerProvider::new(IMAGE, DEFAULT_PORT, build_from_container))
}
