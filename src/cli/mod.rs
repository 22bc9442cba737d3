//! Command-line entry point.
//!
//! ```text
//! forklift [options] <target> [args...]
//! ```
//!
//! `target` is an executable (direct driver) or a Docker image (docker
//! driver). Every requested service is provisioned first; the target then
//! runs with an environment describing them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ColorChoice, Parser};

use crate::config::{
    ConfigPaths, Layer, LogLevel, Options, RunConfig, parse_env_pair, parse_set,
};
use crate::containers::{ContainerManager, DockerRuntime};
use crate::drivers::{self, Driver, DriverKind, Launch};
use crate::error::{ConfigError, DriverError};
use crate::services::{ProvideContext, ServiceInstance, ServiceRegistry, provide_all};

#[derive(Parser, Debug)]
#[command(name = "forklift")]
#[command(about = "Run an application with the backing services it needs")]
#[command(
    long_about = "Provisions the requested services (PostgreSQL, Redis, Elasticsearch, ...) \
    from the first provider that works, then runs the target with an environment \
    describing them.\nExamples:\n  forklift --services postgres,redis ./manage.py runserver\n  \
    forklift --cleanroom --services postgres myorg/myapp"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    /// Application id used to name containers (default: current directory name)
    #[arg(long, alias = "application_id")]
    pub application_id: Option<String>,

    /// Services to provide, comma separated
    #[arg(long, value_delimiter = ',')]
    pub services: Vec<String>,

    /// How to run the target: direct or docker (default: detected)
    #[arg(long)]
    pub driver: Option<DriverKind>,

    /// Only use providers whose resources are thrown away afterwards
    #[arg(long)]
    pub transient: bool,

    /// Remove containers created by this run when it ends
    #[arg(long)]
    pub rm: bool,

    /// Append a random suffix to the application id
    #[arg(long)]
    pub unique: bool,

    /// Same as --unique --transient --rm
    #[arg(long)]
    pub cleanroom: bool,

    /// Extra variable for the target, KEY=VALUE (repeatable)
    #[arg(long = "environment", short = 'e', value_name = "KEY=VALUE")]
    pub environment: Vec<String>,

    /// Service override, <service>.<key>=<value> (repeatable)
    #[arg(long = "set", value_name = "SERVICE.KEY=VALUE")]
    pub set: Vec<String>,

    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(long)]
    pub loglevel: Option<LogLevel>,

    /// Port the application serves on (default: a free port)
    #[arg(long, alias = "serve_port")]
    pub serve_port: Option<u16>,

    /// Docker driver: run the container privileged
    #[arg(long)]
    pub privileged: bool,

    /// Docker driver: allocate a TTY and keep stdin open
    #[arg(long)]
    pub interactive: bool,

    /// Docker driver: host directory mounted at /storage
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Docker driver: address replacing localhost in service hosts
    #[arg(long, alias = "docker_host_address")]
    pub docker_host_address: Option<String>,

    /// Executable or image to run, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "TARGET"
    )]
    pub command: Vec<String>,
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

impl Cli {
    /// The command line as a configuration layer.
    pub fn layer(&self, registry: &ServiceRegistry) -> Result<Layer, ConfigError> {
        let mut layer = Layer {
            options: Options {
                application_id: self.application_id.clone(),
                services: (!self.services.is_empty()).then(|| self.services.clone()),
                driver: self.driver,
                transient: flag(self.transient),
                rm: flag(self.rm),
                unique: flag(self.unique),
                cleanroom: flag(self.cleanroom),
                serve_port: self.serve_port,
                loglevel: self.loglevel,
                privileged: flag(self.privileged),
                interactive: flag(self.interactive),
                storage: self.storage.clone(),
                docker_host_address: self.docker_host_address.clone(),
            },
            ..Layer::default()
        };

        for raw in &self.environment {
            let (key, value) = parse_env_pair(raw)?;
            layer.environment.insert(key, value);
        }
        for raw in &self.set {
            let set = parse_set(raw, registry)?;
            layer
                .overrides
                .entry(set.service)
                .or_default()
                .insert(set.key, set.value);
        }
        Ok(layer)
    }

    /// Resolve every configuration layer for a run started in the current
    /// directory.
    pub fn resolve(&self, registry: &ServiceRegistry) -> Result<RunConfig, ConfigError> {
        let cwd = std::env::current_dir()
            .map_err(|e| ConfigError::Environment(format!("cannot read current directory: {e}")))?;
        let paths = ConfigPaths::for_project(cwd);
        let env = Layer {
            options: Options::from_env()?,
            ..Layer::default()
        };
        RunConfig::resolve(&paths, registry, env, self.layer(registry)?)
    }
}

/// Provision, run the target, clean up. Returns the exit code for the
/// process.
pub async fn run(
    config: &RunConfig,
    registry: &ServiceRegistry,
    command: &[String],
) -> anyhow::Result<i32> {
    let runtime = Arc::new(DockerRuntime::new());
    let containers = Arc::new(ContainerManager::new(runtime).with_cache_root(&config.cache_dir));
    let ctx = ProvideContext::new(&config.application_id, containers);

    let mut instances = match provide_all(
        registry,
        &config.services,
        &ctx,
        &config.overrides,
        config.transient,
    )
    .await
    {
        Ok(instances) => instances,
        Err(e) => {
            eprintln!("{e}");
            return Ok(1);
        }
    };

    let result = launch(config, command, &mut instances).await;
    finish(config, &mut instances).await;
    Ok(result?)
}

async fn launch(
    config: &RunConfig,
    command: &[String],
    instances: &mut [ServiceInstance],
) -> Result<i32, DriverError> {
    let Some((target, args)) = command.split_first() else {
        return Err(DriverError::Config("no target given".to_string()));
    };

    let kind = config.driver.unwrap_or_else(|| DriverKind::detect(target));
    tracing::debug!("Running {} with the {} driver", target, kind);
    let driver = drivers::driver_for(kind, config.docker.clone());
    driver.prepare(instances)?;

    let serve_port = match config.serve_port {
        Some(port) => port,
        None => drivers::free_port()?,
    };
    let launch = Launch {
        target: target.clone(),
        args: args.to_vec(),
        environment: drivers::environment(serve_port, instances, &config.environment),
        serve_port,
    };
    run_driver(driver.as_ref(), &launch).await
}

async fn run_driver(driver: &dyn Driver, launch: &Launch) -> Result<i32, DriverError> {
    let code = driver.run(launch).await?;
    if code != 0 {
        tracing::info!("{} exited with status {}", launch.target, code);
    }
    Ok(code)
}

/// Remove what this run created when asked to, and stop every satellite.
async fn finish(config: &RunConfig, instances: &mut [ServiceInstance]) {
    for instance in instances.iter_mut() {
        if config.rm {
            match instance.cleanup().await {
                Ok(true) => tracing::info!("Removed container for {}", instance.service().name()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to clean up {}: {}", instance.service().name(), e)
                }
            }
        }
        instance.stop_satellite().await;
    }
}
