//! Command-line forms of overrides and extra environment variables.

use crate::error::ConfigError;
use crate::services::endpoints::split_values;
use crate::services::{OverrideValue, ServiceRegistry};

/// One `--set <service>.<key>=<value>` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOverride {
    pub service: String,
    pub key: String,
    pub value: OverrideValue,
}

/// Parse `<service>.<key>=<value>`.
///
/// The service must be registered. For list-valued keys the value is split
/// on `|`; other keys keep it as a single string.
pub fn parse_set(raw: &str, registry: &ServiceRegistry) -> Result<ServiceOverride, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: "--set".to_string(),
        message: format!("'{raw}': {message}"),
    };

    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| invalid("expected <service>.<key>=<value>"))?;
    let (service, key) = path
        .split_once('.')
        .ok_or_else(|| invalid("expected <service>.<key>=<value>"))?;
    if key.is_empty() {
        return Err(invalid("missing key"));
    }

    let descriptor = registry
        .get(service)
        .ok_or_else(|| ConfigError::UnknownService(service.to_string()))?;

    let value = if descriptor.is_list_override(key) {
        OverrideValue::List(split_values(value))
    } else {
        OverrideValue::scalar(value)
    };

    Ok(ServiceOverride {
        service: service.to_string(),
        key: key.to_string(),
        value,
    })
}

/// Parse `KEY=VALUE`. The value may itself contain `=`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ConfigError::InvalidValue {
            key: "environment".to_string(),
            message: format!("'{raw}' is not KEY=VALUE"),
        }),
    }
}
