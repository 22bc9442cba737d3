//! Run the target as a Docker container.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::drivers::direct::supervise;
use crate::drivers::{Driver, DriverKind, Launch};
use crate::error::DriverError;
use crate::services::{OverrideValue, ServiceInstance};

/// Address of the host as seen from a container on the default bridge.
pub const DEFAULT_HOST_ADDRESS: &str = "172.17.0.1";

/// Port the application listens on inside its container.
const CONTAINER_SERVE_PORT: u16 = 8000;

const RESOLV_CONF: &str = "/etc/resolv.conf";

#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Pass `--rm` to `docker run`.
    pub rm: bool,
    pub privileged: bool,
    /// Allocate a TTY and keep stdin open.
    pub interactive: bool,
    /// Host directory mounted at `/storage`.
    pub storage: Option<PathBuf>,
    /// Replaces `localhost` in service hosts.
    pub host_address: String,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            rm: false,
            privileged: false,
            interactive: false,
            storage: None,
            host_address: DEFAULT_HOST_ADDRESS.to_string(),
        }
    }
}

/// Runs an image with `docker run`.
#[derive(Debug, Clone, Default)]
pub struct DockerDriver {
    options: DockerOptions,
}

impl DockerDriver {
    pub fn new(options: DockerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DockerOptions {
        &self.options
    }

    /// Arguments to `docker` for running `launch`.
    pub fn docker_args(&self, launch: &Launch) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-p".to_string(),
            format!("{}:{}", launch.serve_port, CONTAINER_SERVE_PORT),
        ];
        if self.options.rm {
            args.push("--rm".to_string());
        }
        if self.options.privileged {
            args.push("--privileged".to_string());
        }
        if self.options.interactive {
            args.extend(["-i".to_string(), "-t".to_string()]);
        }
        if let Some(storage) = &self.options.storage {
            args.push("-v".to_string());
            args.push(format!("{}:/storage", storage.display()));
        }
        for (key, value) in &launch.environment {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(launch.target.clone());
        args.extend(launch.args.iter().cloned());
        args
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Docker
    }

    /// Point services on `localhost` at the host's bridge address, since
    /// `localhost` inside the container is the container itself.
    fn prepare(&self, services: &mut [ServiceInstance]) -> Result<(), DriverError> {
        let localhost = OverrideValue::scalar("localhost");
        let address = OverrideValue::scalar(self.options.host_address.as_str());
        for instance in services.iter_mut() {
            if instance.service().get_override("host").as_ref() != Some(&localhost) {
                continue;
            }
            tracing::debug!(
                "Rewriting {} host to {}",
                instance.service().name(),
                self.options.host_address
            );
            instance
                .service_mut()
                .apply_override("host", &address)
                .map_err(|e| DriverError::Config(e.to_string()))?;
        }
        Ok(())
    }

    async fn run(&self, launch: &Launch) -> Result<i32, DriverError> {
        warn_local_nameserver(Path::new(RESOLV_CONF));

        if let Some(storage) = &self.options.storage {
            tokio::fs::create_dir_all(storage).await?;
        }

        let mut command = Command::new("docker");
        command.args(self.docker_args(launch));
        supervise(command, "docker").await
    }
}

/// Whether a resolv.conf names a loopback name server.
fn has_local_nameserver(resolv_conf: &str) -> bool {
    resolv_conf
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && line.contains("nameserver"))
        .any(|line| line.contains("127.0.0.1") || line.contains("127.0.1.1"))
}

fn warn_local_nameserver(path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    if has_local_nameserver(&contents) {
        eprintln!(
            "{} on the host specifies localhost as the name server. This will \
             make Docker use Google Public DNS inside the container, and \
             accessing Intranet resources will fail.\n\
             Please fix {} on the host before continuing.",
            path.display(),
            path.display()
        );
    }
}
