//! Syslog.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::containers::port_open;
use crate::error::ConfigError;
use crate::satellite::{self, start_syslog_sink};
use crate::services::availability::{Availability, CONNECT_TIMEOUT};
use crate::services::error::{ProviderError, ServiceError};
use crate::services::provider::{ProvideContext, Provided, Provider};
use crate::services::registry::ServiceDescriptor;
use crate::services::service::{
    OverrideValue, Service, invalid_value, parse_port, single, unknown_key,
};

pub const DEFAULT_PORT: u16 = 514;

const ALLOW_OVERRIDE: &[&str] = &["host", "port", "proto"];

/// Transport used to reach the syslog server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Proto {
    #[default]
    Udp,
    Tcp,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Udp => "udp",
            Proto::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Proto::Udp),
            "tcp" => Ok(Proto::Tcp),
            other => Err(format!("'{other}' is not 'udp' or 'tcp'")),
        }
    }
}

/// A syslog server. Without a host the service is never available.
#[derive(Debug, Clone)]
pub struct Syslog {
    pub host: Option<String>,
    pub port: u16,
    pub proto: Proto,
}

impl Default for Syslog {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            proto: Proto::Udp,
        }
    }
}

impl Syslog {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
            proto: Proto::Udp,
        }
    }
}

#[async_trait]
impl Service for Syslog {
    fn name(&self) -> &'static str {
        "Syslog"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "SYSLOG_SERVER".to_string(),
                self.host.clone().unwrap_or_default(),
            ),
            ("SYSLOG_PORT".to_string(), self.port.to_string()),
            ("SYSLOG_PROTO".to_string(), self.proto.to_string()),
        ])
    }

    /// UDP is connectionless, so a configured host is trusted as is.
    async fn check_available(&self) -> Result<Availability, ServiceError> {
        let Some(host) = &self.host else {
            return Ok(Availability::Retry("No syslog host configured".to_string()));
        };
        match self.proto {
            Proto::Udp => Ok(Availability::Ready),
            Proto::Tcp if port_open(host, self.port, CONNECT_TIMEOUT).await => {
                Ok(Availability::Ready)
            }
            Proto::Tcp => Ok(Availability::Retry(format!(
                "Syslog at {}:{} refused the connection",
                host, self.port
            ))),
        }
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        let service = self.name();
        match key {
            "host" => self.host = Some(single(service, key, value)?),
            "port" => self.port = parse_port(service, key, value)?,
            "proto" => {
                self.proto = single(service, key, value)?
                    .parse()
                    .map_err(|e: String| invalid_value(service, key, e))?;
            }
            _ => return Err(unknown_key(service, key)),
        }
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        match key {
            "host" => self.host.clone().map(OverrideValue::Scalar),
            "port" => Some(OverrideValue::Scalar(self.port.to_string())),
            "proto" => Some(OverrideValue::scalar(self.proto.as_str())),
            _ => None,
        }
    }
}

/// A syslog server configured by hand. Unconfigured, it is not available.
struct Manual;

#[async_trait]
impl Provider for Manual {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn provide(&self, _ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        Ok(Provided::new(Syslog::default()))
    }
}

/// A local UDP sink printing every record to stdout.
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
        let sink = start_syslog_sink(satellite::stdout())
            .await
            .map_err(|e| ProviderError::NotAvailable(format!("Cannot start syslog sink: {e}")))?;
        Ok(Provided::new(Syslog::new("localhost", sink.port())).with_satellite(sink))
    }
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("syslog", "Syslog")
        .with_overrides(ALLOW_OVERRIDE)
        .with_provider(Manual)
        .with_provider(Stdout)
}
