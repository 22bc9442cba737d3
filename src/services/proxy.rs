//! HTTP proxy.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::containers::port_open;
use crate::error::ConfigError;
use crate::services::availability::{Availability, CONNECT_TIMEOUT};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{OverrideValue, Service, parse_port, single, unknown_key};

const ALLOW_OVERRIDE: &[&str] = &["host", "port"];

/// An HTTP proxy for outgoing requests. Without a host no proxy is used.
#[derive(Debug, Clone, Default)]
pub struct Proxy {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[async_trait]
impl Service for Proxy {
    fn name(&self) -> &'static str {
        "Proxy"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        let Some(host) = &self.host else {
            return BTreeMap::new();
        };
        let url = match self.port {
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        };
        BTreeMap::from([("HTTP_PROXY".to_string(), url)])
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        let Some(host) = &self.host else {
            return Ok(Availability::Ready);
        };
        let Some(port) = self.port else {
            return Ok(Availability::Fatal(format!(
                "Proxy host {host} is set without a port"
            )));
        };
        if port_open(host, port, CONNECT_TIMEOUT).await {
            Ok(Availability::Ready)
        } else {
            Ok(Availability::Retry(format!("Proxy {host}:{port} refused the connection")))
        }
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        match key {
            "host" => self.host = Some(single(service, key, value)?),
            "port" => self.port = Some(parse_port(service, key, value)?),
            _ => return Err(unknown_key(service, key)),
        }
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        match key {
            "host" => self.host.clone().map(OverrideValue::Scalar),
            "port" => self.port.map(|p| OverrideValue::Scalar(p.to_string())),
            _ => None,
        }
    }
}

/// A proxy configured by hand. Unconfigured, it means "no proxy".
struct Manual;

#[async_trait]
impl Provider for Manual {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn is_transient(&self) -> bool {
        true
    }

    async fn provide(&self, _ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        Ok(Provided::new(Proxy::default()))
    }
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("proxy", "Proxy")
        .with_overrides(ALLOW_OVERRIDE)
        .with_provider(Manual)
}
