//! Container runtime abstraction and its Docker implementation.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use tokio::sync::RwLock;

use crate::containers::detect::DaemonProblem;
use crate::containers::error::{ContainerError, Result};

/// What a runtime reports about an existing container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    /// Container port to forwarded host port.
    pub ports: HashMap<u16, u16>,
    /// Address of the container on the Docker network.
    pub ip_address: Option<String>,
}

/// Everything needed to create a service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Port inside the container, published on a host-assigned port.
    pub port: u16,
    pub env: Vec<(String, String)>,
    /// Bind mounts: (host path, container path).
    pub binds: Vec<(PathBuf, String)>,
}

/// The subset of a container engine the lifecycle manager needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look a container up by name. `Ok(None)` when it does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>>;

    /// Whether the image is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;
}

/// Connect to the local Docker daemon.
///
/// Tries bollard's defaults first (`DOCKER_HOST` or the platform socket),
/// then the Docker Desktop and rootless socket locations.
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    #[cfg(unix)]
    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy();
        if let Ok(docker) = Docker::connect_with_socket(&path, 120, bollard::API_DEFAULT_VERSION)
            && docker.ping().await.is_ok()
        {
            tracing::debug!("Connected to Docker via {}", path);
            return Ok(docker);
        }
    }

    Err(ContainerError::DaemonUnavailable {
        reason: "no Docker socket responded to ping".to_string(),
        fix: None,
    })
}

#[cfg(unix)]
fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
        sockets.push(home.join(".docker/desktop/docker.sock"));
    }
    if let Some(runtime_dir) = dirs::runtime_dir() {
        sockets.push(runtime_dir.join("docker.sock"));
    }
    sockets.push(PathBuf::from("/var/run/docker.sock"));
    sockets
}

/// [`ContainerRuntime`] backed by the local Docker daemon.
///
/// The connection is made on first use so that runs which never need a
/// container do not require Docker at all.
#[derive(Default)]
pub struct DockerRuntime {
    docker: RwLock<Option<Docker>>,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Docker> {
        if let Some(docker) = self.docker.read().await.as_ref() {
            return Ok(docker.clone());
        }

        let docker = match connect_docker().await {
            Ok(docker) => docker,
            Err(e) => {
                tracing::debug!("Docker connection failed: {}", e);
                let problem = DaemonProblem::diagnose();
                return Err(ContainerError::DaemonUnavailable {
                    reason: problem.describe().to_string(),
                    fix: Some(problem.fix().to_string()),
                });
            }
        };

        *self.docker.write().await = Some(docker.clone());
        Ok(docker)
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// 304 is what Docker answers when stopping an already stopped container.
fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

/// Failures below the HTTP layer: the daemon went away mid-run.
fn is_transport(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::IOError { .. }
            | BollardError::HyperResponseError { .. }
            | BollardError::HyperLegacyError { .. }
            | BollardError::RequestTimeoutError
            | BollardError::SocketNotFoundError(_)
    )
}

fn api_error(operation: &'static str, name: &str, err: BollardError) -> ContainerError {
    if is_transport(&err) {
        return ContainerError::DaemonUnavailable {
            reason: format!("{operation} of '{name}' failed: {err}"),
            fix: None,
        };
    }
    ContainerError::Api {
        operation,
        name: name.to_string(),
        reason: err.to_string(),
    }
}

/// Parse the forwarded ports out of an inspect response.
fn status_from_inspect(info: ContainerInspectResponse) -> ContainerStatus {
    let running = info.state.and_then(|s| s.running).unwrap_or(false);
    let settings = info.network_settings.unwrap_or_default();

    let mut ports = HashMap::new();
    for (key, bindings) in settings.ports.unwrap_or_default() {
        let Some(container_port) = key
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let host_port = bindings
            .unwrap_or_default()
            .into_iter()
            .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()));
        if let Some(host_port) = host_port {
            ports.insert(container_port, host_port);
        }
    }

    ContainerStatus {
        running,
        ports,
        ip_address: settings.ip_address.filter(|ip| !ip.is_empty()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>> {
        let docker = self.client().await?;
        match docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(status_from_inspect(info))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(api_error("inspect", name, e)),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let docker = self.client().await?;
        match docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("inspect image", image, e)),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let docker = self.client().await?;
        let port_key = format!("{}/tcp", spec.port);

        // An empty host port lets Docker pick a free one.
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        );

        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            HashMap::from([(port_key, HashMap::new())]);

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let binds: Vec<String> = spec
            .binds
            .iter()
            .map(|(host, container)| format!("{}:{}", host.display(), container))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| api_error("create", &spec.name, e))?;

        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let docker = self.client().await?;
        docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| api_error("start", name, e))
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let docker = self.client().await?;
        match docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) || is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error("stop", name, e)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let docker = self.client().await?;
        match docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error("remove", name, e)),
        }
    }
}
