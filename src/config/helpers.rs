use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating empty as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::Environment(format!("failed to read {key}: {e}"))),
    }
}

/// Read and parse an environment variable.
pub(crate) fn parse_optional_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// Parse a boolean the way environment flags are usually written.
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{value}' is not a boolean"),
        }),
    }
}

/// Read a boolean environment flag.
pub(crate) fn optional_bool_env(key: &str) -> Result<Option<bool>, ConfigError> {
    optional_env(key)?
        .map(|value| parse_bool(key, &value))
        .transpose()
}
