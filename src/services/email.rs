//! Outgoing mail (an SMTP server).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::containers::port_open;
use crate::error::ConfigError;
use crate::satellite::{self, start_smtp_sink};
use crate::services::availability::{Availability, CONNECT_TIMEOUT};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{OverrideValue, Service, parse_port, single, unknown_key};

pub const DEFAULT_PORT: u16 = 25;

const ALLOW_OVERRIDE: &[&str] = &["host", "port"];

/// An SMTP server the application sends mail through.
#[derive(Debug, Clone)]
pub struct Email {
    pub host: String,
    pub port: u16,
}

impl Email {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Service for Email {
    fn name(&self) -> &'static str {
        "Email"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("EMAIL_HOST".to_string(), self.host.clone()),
            ("EMAIL_PORT".to_string(), self.port.to_string()),
        ])
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        if port_open(&self.host, self.port, CONNECT_TIMEOUT).await {
            return Ok(Availability::Ready);
        }
        Ok(Availability::Retry(format!(
            "No SMTP server at {}:{}",
            self.host, self.port
        )))
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        match key {
            "host" => self.host = single(service, key, value)?,
            "port" => self.port = parse_port(service, key, value)?,
            _ => return Err(unknown_key(service, key)),
        }
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        let value = match key {
            "host" => self.host.clone(),
            "port" => self.port.to_string(),
            _ => return None,
        };
        Some(OverrideValue::Scalar(value))
    }
}

/// The MTA on this machine.
struct Localhost;

#[async_trait]
impl Provider for Localhost {
    fn name(&self) -> &'static str {
        "localhost"
    }

    async fn provide(&self, _ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        Ok(Provided::new(Email::new("localhost", DEFAULT_PORT)))
    }
}

/// A debugging SMTP server that prints every message to stdout.
struct Stdout;

#[async_trait]
impl Provider for Stdout {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn is_transient(&self) -> bool {
        true
    }

    async fn provide(&self, _ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        let sink = start_smtp_sink(satellite::stdout())
            .await
            .map_err(|e| ProviderError::NotAvailable(format!("Cannot start SMTP sink: {e}")))?;
        Ok(Provided::new(Email::new("localhost", sink.port())).with_satellite(sink))
    }
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("email", "Email")
        .with_overrides(ALLOW_OVERRIDE)
        .with_provider(Localhost)
        .with_provider(Stdout)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::containers::ContainerManager;
    use crate::testing::FakeRuntime;

    #[test]
    fn environment_has_host_and_port() {
        let mut email = Email::new("localhost", DEFAULT_PORT);
        email.apply_override("port", &"2525".into()).unwrap();
        let env = email.environment();
        assert_eq!(env["EMAIL_HOST"], "localhost");
        assert_eq!(env["EMAIL_PORT"], "2525");
    }

    #[tokio::test]
    async fn stdout_provider_serves_smtp() {
        let runtime = Arc::new(FakeRuntime::new());
        let ctx = ProvideContext::new("myapp", Arc::new(ContainerManager::new(runtime)));

        let provided = Stdout.provide(&ctx).await.unwrap();
        let satellite = provided.satellite.as_ref().unwrap();
        assert!(satellite.is_running());
        assert_eq!(
            provided.service.get_override("port"),
            Some(OverrideValue::Scalar(satellite.port().to_string()))
        );
        assert!(provided.service.check_available().await.unwrap().is_ready());
    }
}
