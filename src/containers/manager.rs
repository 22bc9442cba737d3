//! Service container lifecycle: reuse, create, start, wait, destroy.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::containers::error::{ContainerError, Result};
use crate::containers::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};
use crate::wait::{PollPolicy, wait_for};

/// Deterministic container name for an image and application.
///
/// Slashes (and anything else Docker rejects in a name) become underscores,
/// so `dockerfile/elasticsearch` for `myapp` is
/// `dockerfile_elasticsearch__myapp`.
pub fn container_name_for(image: &str, application_id: &str) -> String {
    format!("{}__{}", image, application_id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Default cache root: `<user-cache-dir>/forklift`.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("forklift")
}

/// A request for a service container.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub image: String,
    /// Port the service listens on inside the container.
    pub port: u16,
    pub application_id: String,
    /// Directory inside the container to back with a persistent host cache.
    pub data_dir: Option<String>,
    pub env: Vec<(String, String)>,
}

impl ContainerRequest {
    pub fn new(image: impl Into<String>, port: u16, application_id: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            port,
            application_id: application_id.into(),
            data_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// A running service container as resolved by [`ContainerManager::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub image: String,
    pub name: String,
    /// Host to reach the forwarded port on.
    pub host: String,
    /// Forwarded port on the host.
    pub port: u16,
    /// Address of the container on the Docker network.
    pub ip_address: Option<String>,
    /// Host directory mounted as the container's data directory.
    pub cache_dir: Option<PathBuf>,
    /// Whether this invocation created the container. Never recomputed.
    pub created: bool,
}

/// Ensures service containers exist and are running.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    cache_root: PathBuf,
    port_wait: PollPolicy,
    connect_timeout: Duration,
}

impl std::fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerManager")
            .field("cache_root", &self.cache_root)
            .field("port_wait", &self.port_wait)
            .finish_non_exhaustive()
    }
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            cache_root: default_cache_root(),
            port_wait: PollPolicy::seconds(30),
            connect_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    /// How long to wait for the forwarded port to accept connections.
    pub fn with_port_wait(mut self, port_wait: PollPolicy) -> Self {
        self.port_wait = port_wait;
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Host directory used to persist data for the named container.
    pub fn cache_directory(&self, container_name: &str) -> PathBuf {
        self.cache_root.join(container_name)
    }

    /// Ensure a container for an application is running and reachable.
    ///
    /// An existing container with the deterministic name is reused. Otherwise
    /// the image must already be present locally; it is never pulled. If the
    /// forwarded port never opens, a container created by this call is
    /// destroyed before the error is returned.
    pub async fn ensure(&self, request: &ContainerRequest) -> Result<ContainerRecord> {
        let name = container_name_for(&request.image, &request.application_id);
        tracing::info!(
            "Ensuring container for '{}' is started with name '{}'",
            request.image,
            name
        );

        let cache_dir = request
            .data_dir
            .as_ref()
            .map(|_| self.cache_directory(&name));

        let (status, created) = match self.runtime.inspect_container(&name).await? {
            Some(status) => {
                tracing::debug!("Reusing existing container '{}'", name);
                (status, false)
            }
            None => {
                if !self.runtime.image_exists(&request.image).await? {
                    return Err(ContainerError::ImageRequired {
                        image: request.image.clone(),
                    });
                }
                let status = self.create(&name, request, cache_dir.as_deref()).await?;
                (status, true)
            }
        };

        match self.bring_up(&name, request, status).await {
            Ok((port, ip_address)) => Ok(ContainerRecord {
                image: request.image.clone(),
                name,
                host: "localhost".to_string(),
                port,
                ip_address,
                cache_dir,
                created,
            }),
            Err(e) => {
                if created {
                    tracing::warn!("Container '{}' failed to come up, removing it", name);
                    if let Err(destroy_err) = self.destroy(&name).await {
                        tracing::warn!("Failed to remove container '{}': {}", name, destroy_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn create(
        &self,
        name: &str,
        request: &ContainerRequest,
        cache_dir: Option<&Path>,
    ) -> Result<ContainerStatus> {
        let mut binds = Vec::new();
        if let (Some(cache_dir), Some(data_dir)) = (cache_dir, request.data_dir.as_ref()) {
            tokio::fs::create_dir_all(cache_dir).await?;
            binds.push((cache_dir.to_path_buf(), data_dir.clone()));
        }

        let spec = ContainerSpec {
            name: name.to_string(),
            image: request.image.clone(),
            port: request.port,
            env: request.env.clone(),
            binds,
        };

        tracing::info!("Creating '{}' container '{}'", request.image, name);
        tracing::debug!("Container port: {}", request.port);
        tracing::debug!("Container data dir (in container): {:?}", request.data_dir);
        tracing::debug!("Container cached dir (on host): {:?}", cache_dir);
        self.runtime.create_container(&spec).await?;

        self.runtime
            .inspect_container(name)
            .await?
            .ok_or_else(|| ContainerError::Api {
                operation: "inspect",
                name: name.to_string(),
                reason: "container vanished right after creation".to_string(),
            })
    }

    /// Start the container if needed, then wait for its forwarded port.
    async fn bring_up(
        &self,
        name: &str,
        request: &ContainerRequest,
        mut status: ContainerStatus,
    ) -> Result<(u16, Option<String>)> {
        if !status.running {
            tracing::info!("Starting '{}' container", request.image);
            self.runtime.start_container(name).await?;
            status = self
                .runtime
                .inspect_container(name)
                .await?
                .unwrap_or_default();
        }

        let host_port =
            *status
                .ports
                .get(&request.port)
                .ok_or_else(|| ContainerError::PortNotForwarded {
                    name: name.to_string(),
                    port: request.port,
                })?;

        tracing::debug!(
            "Waiting for '{}' port {} to be reachable",
            request.image,
            host_port
        );
        let connect_timeout = self.connect_timeout;
        let reachable = wait_for(self.port_wait, move || {
            port_open("127.0.0.1", host_port, connect_timeout)
        })
        .await;

        if !reachable {
            return Err(ContainerError::RefusingConnections {
                image: request.image.clone(),
                port: host_port,
            });
        }

        Ok((host_port, status.ip_address))
    }

    /// Stop and remove a container, then delete its cache directory.
    ///
    /// Failing to delete the cache directory is logged and otherwise ignored.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        tracing::info!("Destroying container '{}'", name);
        self.runtime.stop_container(name).await?;
        self.runtime.remove_container(name).await?;

        let cache_dir = self.cache_directory(name);
        if let Err(e) = tokio::fs::remove_dir_all(&cache_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                "Could not remove cache directory {}: {}",
                cache_dir.display(),
                e
            );
        }
        Ok(())
    }
}

/// Whether a TCP connection to `host:port` succeeds within `timeout`.
pub async fn port_open(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
