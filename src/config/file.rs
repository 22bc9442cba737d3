//! YAML configuration files.
//!
//! ```yaml
//! services: [postgres, redis]
//! transient: true
//! environment:
//!   DEBUG: "1"
//! postgres:
//!   host: db.local
//!   port: 5433
//! elasticsearch:
//!   urls: [http://a:9200, http://b:9200]
//! ```
//!
//! Top-level mappings named after a registered service hold that service's
//! overrides. `environment` may also be a list of `KEY=VALUE` strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yml::{Mapping, Value};

use crate::config::overrides::parse_env_pair;
use crate::config::{Layer, Options};
use crate::error::ConfigError;
use crate::services::{OverrideValue, Overrides, ServiceRegistry};

const ENVIRONMENT_KEY: &str = "environment";

/// Read a configuration file. A missing file is not an error.
pub fn load_layer(path: &Path, registry: &ServiceRegistry) -> Result<Option<Layer>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(invalid_file(path, e)),
    };
    tracing::debug!("Reading configuration from {}", path.display());
    parse_layer(&text, registry)
        .map(Some)
        .map_err(|message| invalid_file(path, message))
}

fn invalid_file(path: &Path, message: impl ToString) -> ConfigError {
    ConfigError::InvalidFile {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Parse the text of a configuration file.
pub fn parse_layer(text: &str, registry: &ServiceRegistry) -> Result<Layer, String> {
    let root: Value = serde_yml::from_str(text).map_err(|e| e.to_string())?;
    let mapping = match root {
        Value::Null => return Ok(Layer::default()),
        Value::Mapping(mapping) => mapping,
        _ => return Err("expected a mapping at the top level".to_string()),
    };

    let mut options = Mapping::new();
    let mut environment = BTreeMap::new();
    let mut overrides = BTreeMap::new();

    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            return Err(format!("keys must be strings, found {key:?}"));
        };
        if name == ENVIRONMENT_KEY {
            environment = parse_environment(value)?;
        } else if registry.contains(name)
            && let Value::Mapping(values) = &value
        {
            overrides.insert(name.to_string(), parse_overrides(name, values)?);
        } else {
            options.insert(key, value);
        }
    }

    let options: Options =
        serde_yml::from_value(Value::Mapping(options)).map_err(|e| e.to_string())?;

    Ok(Layer {
        options,
        environment,
        overrides,
    })
}

fn parse_environment(value: Value) -> Result<BTreeMap<String, String>, String> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Mapping(mapping) => mapping
            .into_iter()
            .map(|(key, value)| -> Result<(String, String), String> {
                let key = scalar_string(&key).ok_or("environment keys must be scalars")?;
                let value = scalar_string(&value)
                    .ok_or_else(|| format!("environment value for {key} must be a scalar"))?;
                Ok((key, value))
            })
            .collect(),
        Value::Sequence(items) => items
            .iter()
            .map(|item| -> Result<(String, String), String> {
                let pair = scalar_string(item).ok_or("environment entries must be KEY=VALUE")?;
                parse_env_pair(&pair).map_err(|e| e.to_string())
            })
            .collect(),
        _ => Err("environment must be a mapping or a list".to_string()),
    }
}

fn parse_overrides(service: &str, values: &Mapping) -> Result<Overrides, String> {
    let mut overrides = Overrides::new();
    for (key, value) in values {
        let key = key
            .as_str()
            .ok_or_else(|| format!("{service}: keys must be strings"))?;
        let value = match value {
            Value::Null => continue,
            Value::Sequence(items) => OverrideValue::List(
                items
                    .iter()
                    .map(|item| {
                        scalar_string(item)
                            .ok_or_else(|| format!("{service}.{key}: list items must be scalars"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            other => OverrideValue::Scalar(
                scalar_string(other)
                    .ok_or_else(|| format!("{service}.{key}: expected a value or a list"))?,
            ),
        };
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}

/// Strings, numbers and booleans as written.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::drivers::DriverKind;

    fn parse(text: &str) -> Layer {
        parse_layer(text, &ServiceRegistry::builtin()).unwrap()
    }

    #[test]
    fn options_environment_and_overrides() {
        let layer = parse(
            r#"
application_id: shop
services: [postgres, elasticsearch]
driver: direct
transient: true
serve_port: 8080
environment:
  DEBUG: 1
  SITE_NAME: Shop
postgres:
  host: db.local
  port: 5433
  password: ~
elasticsearch:
  urls:
    - http://a:9200
    - http://b:9200
"#,
        );

        assert_eq!(layer.options.application_id.as_deref(), Some("shop"));
        assert_eq!(
            layer.options.services,
            Some(vec!["postgres".to_string(), "elasticsearch".to_string()])
        );
        assert_eq!(layer.options.driver, Some(DriverKind::Direct));
        assert_eq!(layer.options.transient, Some(true));
        assert_eq!(layer.options.serve_port, Some(8080));
        assert_eq!(layer.environment["DEBUG"], "1");

        let postgres = &layer.overrides["postgres"];
        assert_eq!(postgres["host"], OverrideValue::scalar("db.local"));
        assert_eq!(postgres["port"], OverrideValue::scalar("5433"));
        assert!(!postgres.contains_key("password"));
        assert_eq!(
            layer.overrides["elasticsearch"]["urls"],
            OverrideValue::list(["http://a:9200", "http://b:9200"])
        );
    }

    #[test]
    fn environment_as_list() {
        let layer = parse("environment:\n  - A=1\n  - B=x=y\n");
        assert_eq!(layer.environment["A"], "1");
        assert_eq!(layer.environment["B"], "x=y");
    }

    #[test]
    fn empty_file_is_empty_layer() {
        let layer = parse("");
        assert!(layer.options.application_id.is_none());
        assert!(layer.overrides.is_empty());
    }

    #[test]
    fn unknown_option_is_rejected() {
        let registry = ServiceRegistry::builtin();
        assert!(parse_layer("colour: blue\n", &registry).is_err());
        assert!(parse_layer("- just\n- a list\n", &registry).is_err());
        assert!(parse_layer("driver: vagrant\n", &registry).is_err());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::builtin();
        assert!(
            load_layer(&dir.path().join("forklift.yaml"), &registry)
                .unwrap()
                .is_none()
        );

        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "services: [unterminated\n").unwrap();
        assert!(matches!(
            load_layer(&path, &registry),
            Err(ConfigError::InvalidFile { .. })
        ));
    }
}
