//! The `Service` trait and override values.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::services::availability::Availability;
use crate::services::endpoints::{DELIMITER, EndpointError, split_values};
use crate::services::error::ServiceError;

/// Overrides for one service, keyed by attribute name.
pub type Overrides = BTreeMap<String, OverrideValue>;

/// A configured value for a service attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideValue {
    Scalar(String),
    List(Vec<String>),
}

impl OverrideValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    /// Every value. A scalar is split on `|`.
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Scalar(value) => split_values(value),
            Self::List(values) => values.clone(),
        }
    }

    /// The value as one string. A list is joined with `|`.
    pub fn joined(&self) -> String {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::List(values) => values.join(DELIMITER),
        }
    }
}

impl fmt::Display for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl From<&str> for OverrideValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for OverrideValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

/// A backing dependency of the application, as provisioned for one run.
///
/// The environment it exports is the whole contract with the target
/// process. Attributes named in the service's allow-lists can be read and
/// written through [`get_override`](Self::get_override) and
/// [`apply_override`](Self::apply_override).
#[async_trait]
pub trait Service: Send + Sync + fmt::Debug {
    /// Display name, e.g. `PostgreSQL`.
    fn name(&self) -> &'static str;

    /// Environment variables for the target process.
    fn environment(&self) -> BTreeMap<String, String>;

    /// Probe the service once.
    ///
    /// Expected failures are returned as [`Availability::Retry`] or
    /// [`Availability::Fatal`]; `Err` is reserved for bugs and other
    /// surprises.
    async fn check_available(&self) -> Result<Availability, ServiceError>;

    /// Set an attribute from configuration.
    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError>;

    /// Read an attribute back, `None` if unknown or unset.
    fn get_override(&self, key: &str) -> Option<OverrideValue>;
}

/// The override key is not an attribute of this service.
pub(crate) fn unknown_key(service: &str, key: &str) -> ConfigError {
    ConfigError::InvalidOverride {
        service: service.to_string(),
        key: key.to_string(),
    }
}

pub(crate) fn invalid_value(service: &str, key: &str, message: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidOverrideValue {
        service: service.to_string(),
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// A single string value. One-element lists are accepted.
pub(crate) fn single(service: &str, key: &str, value: &OverrideValue) -> Result<String, ConfigError> {
    match value {
        OverrideValue::Scalar(value) => Ok(value.clone()),
        OverrideValue::List(values) if values.len() == 1 => Ok(values[0].clone()),
        OverrideValue::List(values) => Err(invalid_value(
            service,
            key,
            format!("expected a single value, got {}", values.len()),
        )),
    }
}

pub(crate) fn parse_port(service: &str, key: &str, value: &OverrideValue) -> Result<u16, ConfigError> {
    let raw = single(service, key, value)?;
    raw.trim()
        .parse()
        .map_err(|_| invalid_value(service, key, format!("'{raw}' is not a port number")))
}

pub(crate) fn endpoint_error(service: &str, key: &str, err: EndpointError) -> ConfigError {
    invalid_value(service, key, err)
}
