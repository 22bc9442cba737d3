//! Run configuration.
//!
//! Settings are layered, later layers winning key by key:
//!
//! 1. defaults (`application_id` is the name of the current directory)
//! 2. `forklift.yaml` in the current directory
//! 3. `<config dir>/forklift/_default.yaml`
//! 4. `<config dir>/forklift/<application_id>.yaml`
//! 5. `FORKLIFT_*` environment variables
//! 6. the command line

pub(crate) mod file;
pub(crate) mod helpers;
pub mod overrides;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::config::helpers::{optional_bool_env, optional_env, parse_optional_env};
use crate::drivers::{DockerOptions, DriverKind};
use crate::drivers::docker::DEFAULT_HOST_ADDRESS;
use crate::error::ConfigError;
use crate::services::{Overrides, ServiceRegistry};

pub use file::{load_layer, parse_layer};
pub use overrides::{ServiceOverride, parse_env_pair, parse_set};

/// Name of the per-project configuration file.
pub const PROJECT_FILE: &str = "forklift.yaml";

/// Name of the per-user file applied to every application.
pub const DEFAULT_FILE: &str = "_default.yaml";

/// Minimum level of log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!(
                "invalid log level '{}', expected DEBUG, INFO, WARNING, ERROR or CRITICAL",
                s
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Run options as given by one configuration layer. `None` leaves the
/// value of earlier layers in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    pub application_id: Option<String>,
    pub services: Option<Vec<String>>,
    pub driver: Option<DriverKind>,
    pub transient: Option<bool>,
    pub rm: Option<bool>,
    pub unique: Option<bool>,
    /// Shorthand for `unique`, `transient` and `rm`.
    pub cleanroom: Option<bool>,
    pub serve_port: Option<u16>,
    pub loglevel: Option<LogLevel>,
    pub privileged: Option<bool>,
    pub interactive: Option<bool>,
    pub storage: Option<PathBuf>,
    pub docker_host_address: Option<String>,
}

impl Options {
    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: Options) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            application_id,
            services,
            driver,
            transient,
            rm,
            unique,
            cleanroom,
            serve_port,
            loglevel,
            privileged,
            interactive,
            storage,
            docker_host_address,
        );
    }

    /// Options from `FORKLIFT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            application_id: optional_env("FORKLIFT_APPLICATION_ID")?,
            services: optional_env("FORKLIFT_SERVICES")?.map(|s| split_list(&s)),
            driver: parse_optional_env("FORKLIFT_DRIVER")?,
            transient: optional_bool_env("FORKLIFT_TRANSIENT")?,
            rm: optional_bool_env("FORKLIFT_RM")?,
            unique: optional_bool_env("FORKLIFT_UNIQUE")?,
            cleanroom: optional_bool_env("FORKLIFT_CLEANROOM")?,
            serve_port: parse_optional_env("FORKLIFT_SERVE_PORT")?,
            loglevel: parse_optional_env("FORKLIFT_LOGLEVEL")?,
            privileged: optional_bool_env("FORKLIFT_PRIVILEGED")?,
            interactive: optional_bool_env("FORKLIFT_INTERACTIVE")?,
            storage: optional_env("FORKLIFT_STORAGE")?.map(PathBuf::from),
            docker_host_address: optional_env("FORKLIFT_DOCKER_HOST_ADDRESS")?,
        })
    }
}

/// Split a comma or whitespace separated list.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Everything one configuration source contributes.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    pub options: Options,
    /// Extra variables for the target.
    pub environment: BTreeMap<String, String>,
    /// Overrides per service registry key.
    pub overrides: BTreeMap<String, Overrides>,
}

impl Layer {
    /// Overlay `other` on top of `self`. Environment variables and service
    /// overrides are merged key by key.
    pub fn merge(&mut self, other: Layer) {
        self.options.merge(other.options);
        self.environment.extend(other.environment);
        for (service, overrides) in other.overrides {
            self.overrides.entry(service).or_default().extend(overrides);
        }
    }
}

/// Where configuration and cached container data live.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Directory holding `forklift.yaml`.
    pub project_dir: PathBuf,
    /// `<config dir>/forklift`, if the platform has one.
    pub user_config_dir: Option<PathBuf>,
    /// `<cache dir>/forklift`.
    pub cache_dir: PathBuf,
}

impl ConfigPaths {
    /// Standard locations for a run started in `project_dir`.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            user_config_dir: dirs::config_dir().map(|d| d.join("forklift")),
            cache_dir: crate::containers::default_cache_root(),
        }
    }

    /// Configuration files in the order they are applied.
    pub fn files(&self, application_id: &str) -> Vec<PathBuf> {
        let mut files = vec![self.project_dir.join(PROJECT_FILE)];
        if let Some(dir) = &self.user_config_dir {
            files.push(dir.join(DEFAULT_FILE));
            files.push(dir.join(format!("{application_id}.yaml")));
        }
        files
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub application_id: String,
    /// Registry keys, in the order they were requested.
    pub services: Vec<String>,
    pub overrides: BTreeMap<String, Overrides>,
    /// Extra variables, applied after every service.
    pub environment: BTreeMap<String, String>,
    /// `None` picks a driver from the target.
    pub driver: Option<DriverKind>,
    pub transient: bool,
    pub rm: bool,
    pub unique: bool,
    pub serve_port: Option<u16>,
    pub loglevel: LogLevel,
    pub docker: DockerOptions,
    pub cache_dir: PathBuf,
}

impl RunConfig {
    /// Resolve every layer. `env` and `cli` are the two highest layers.
    ///
    /// The per-application file is chosen with the application id the
    /// other layers settle on.
    pub fn resolve(
        paths: &ConfigPaths,
        registry: &ServiceRegistry,
        env: Layer,
        cli: Layer,
    ) -> Result<Self, ConfigError> {
        let mut layer = Layer {
            options: Options {
                application_id: Some(default_application_id(&paths.project_dir)),
                ..Options::default()
            },
            ..Layer::default()
        };

        let files = paths.files(&probe_application_id(paths, registry, &layer, &env, &cli)?);
        for path in files {
            if let Some(file) = load_layer(&path, registry)? {
                layer.merge(file);
            }
        }
        layer.merge(env);
        layer.merge(cli);

        Self::from_layer(layer, paths.cache_dir.clone())
    }

    /// Finish a merged layer: apply `cleanroom` and `unique`.
    pub fn from_layer(layer: Layer, cache_dir: PathBuf) -> Result<Self, ConfigError> {
        let options = layer.options;
        let cleanroom = options.cleanroom.unwrap_or(false);

        let mut application_id = options.application_id.unwrap_or_default();
        if application_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "application_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let unique = cleanroom || options.unique.unwrap_or(false);
        if unique {
            application_id = format!("{application_id}-{}", uuid::Uuid::new_v4());
        }

        Ok(Self {
            application_id,
            services: options.services.unwrap_or_default(),
            overrides: layer.overrides,
            environment: layer.environment,
            driver: options.driver,
            transient: cleanroom || options.transient.unwrap_or(false),
            rm: cleanroom || options.rm.unwrap_or(false),
            unique,
            serve_port: options.serve_port,
            loglevel: options.loglevel.unwrap_or_default(),
            docker: DockerOptions {
                rm: cleanroom || options.rm.unwrap_or(false),
                privileged: options.privileged.unwrap_or(false),
                interactive: options.interactive.unwrap_or(false),
                storage: options.storage,
                host_address: options
                    .docker_host_address
                    .unwrap_or_else(|| DEFAULT_HOST_ADDRESS.to_string()),
            },
            cache_dir,
        })
    }
}

/// Name of the project directory.
pub fn default_application_id(project_dir: &Path) -> String {
    project_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string())
}

/// The application id from every layer except the per-application file.
fn probe_application_id(
    paths: &ConfigPaths,
    registry: &ServiceRegistry,
    defaults: &Layer,
    env: &Layer,
    cli: &Layer,
) -> Result<String, ConfigError> {
    let mut options = defaults.options.clone();
    let shared = paths
        .files("")
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name == PROJECT_FILE || name == DEFAULT_FILE)
        })
        .collect::<Vec<_>>();
    for path in shared {
        if let Some(file) = load_layer(&path, registry)? {
            options.merge(file.options);
        }
    }
    options.merge(env.options.clone());
    options.merge(cli.options.clone());
    Ok(options.application_id.unwrap_or_default())
}
