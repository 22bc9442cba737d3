//! Providers: named strategies for obtaining a service instance.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::containers::{ContainerManager, ContainerRecord, ContainerRequest, container_name_for};
use crate::satellite::Satellite;
use crate::services::availability::wait_until_available;
use crate::services::error::ProviderError;
use crate::services::service::Service;
use crate::wait::PollPolicy;

/// Everything a provider may need while producing an instance.
#[derive(Clone)]
pub struct ProvideContext {
    pub application_id: String,
    pub containers: Arc<ContainerManager>,
    /// Budget for post-start readiness checks of container-backed services.
    pub readiness: PollPolicy,
}

impl ProvideContext {
    pub fn new(application_id: impl Into<String>, containers: Arc<ContainerManager>) -> Self {
        Self {
            application_id: application_id.into(),
            containers,
            readiness: PollPolicy::default(),
        }
    }

    pub fn with_readiness(mut self, readiness: PollPolicy) -> Self {
        self.readiness = readiness;
        self
    }
}

/// What a provider hands back to the orchestrator.
#[derive(Debug)]
pub struct Provided {
    pub service: Box<dyn Service>,
    /// Set when the instance lives in a container.
    pub container: Option<ContainerRecord>,
    /// Set when the instance is served by an in-process satellite.
    pub satellite: Option<Satellite>,
}

impl Provided {
    pub fn new(service: impl Service + 'static) -> Self {
        Self {
            service: Box::new(service),
            container: None,
            satellite: None,
        }
    }

    pub fn with_container(mut self, container: ContainerRecord) -> Self {
        self.container = Some(container);
        self
    }

    pub fn with_satellite(mut self, satellite: Satellite) -> Self {
        self.satellite = Some(satellite);
        self
    }
}

/// A way to obtain a working instance of a service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, e.g. `localhost` or `container`.
    fn name(&self) -> &'static str;

    /// Whether the provided resource is disposable after the run.
    fn is_transient(&self) -> bool {
        false
    }

    async fn provide(&self, ctx: &ProvideContext) -> Result<Provided, ProviderError>;

    /// Set when instances come from a container.
    fn as_container(&self) -> Option<&ContainerProvider> {
        None
    }
}

/// Provider name shared by every container-backed service.
pub const CONTAINER: &str = "container";

/// Builds a service instance pointing at a started container.
pub type ContainerBuild = fn(&str, &ContainerRecord) -> Box<dyn Service>;

/// Prepares the host cache directory before the container is created.
pub type PrepareCache = fn(&Path) -> std::io::Result<()>;

/// Provider running the service in a Docker container.
///
/// The container is reused across runs; see
/// [`ContainerManager::ensure`](crate::containers::ContainerManager::ensure).
pub struct ContainerProvider {
    image: &'static str,
    port: u16,
    data_dir: Option<&'static str>,
    env: fn(&str) -> Vec<(String, String)>,
    prepare: Option<PrepareCache>,
    build: ContainerBuild,
    wait_ready: bool,
}

impl ContainerProvider {
    pub fn new(image: &'static str, port: u16, build: ContainerBuild) -> Self {
        Self {
            image,
            port,
            data_dir: None,
            env: |_| Vec::new(),
            prepare: None,
            build,
            wait_ready: false,
        }
    }

    /// Persist `data_dir` inside the container in the host cache.
    pub fn with_data_dir(mut self, data_dir: &'static str) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    /// Container environment, computed from the application id.
    pub fn with_env(mut self, env: fn(&str) -> Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_prepare(mut self, prepare: PrepareCache) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// Wait for the service probe to pass before handing the instance over.
    pub fn wait_until_ready(mut self) -> Self {
        self.wait_ready = true;
        self
    }

    pub fn image(&self) -> &'static str {
        self.image
    }

    /// The service instance pointing at `record`.
    pub fn instantiate(&self, application_id: &str, record: &ContainerRecord) -> Box<dyn Service> {
        (self.build)(application_id, record)
    }
}

#[async_trait]
impl Provider for ContainerProvider {
    fn name(&self) -> &'static str {
        CONTAINER
    }

    fn is_transient(&self) -> bool {
        true
    }

    fn as_container(&self) -> Option<&ContainerProvider> {
        Some(self)
    }

    async fn provide(&self, ctx: &ProvideContext) -> Result<Provided, ProviderError> {
        let app = ctx.application_id.as_str();

        // Cache directory this call created, removed again if the container
        // never materialises.
        let mut fresh_cache_dir = None;
        if let Some(prepare) = self.prepare {
            let cache_dir = ctx
                .containers
                .cache_directory(&container_name_for(self.image, app));
            if !cache_dir.exists() {
                fresh_cache_dir = Some(cache_dir.clone());
            }
            tokio::fs::create_dir_all(&cache_dir)
                .await
                .map_err(|e| ProviderError::Unexpected(format!("{}: {}", cache_dir.display(), e)))?;
            prepare(&cache_dir)
                .map_err(|e| ProviderError::Unexpected(format!("{}: {}", cache_dir.display(), e)))?;
        }

        let mut request = ContainerRequest::new(self.image, self.port, app).with_env((self.env)(app));
        if let Some(data_dir) = self.data_dir {
            request = request.with_data_dir(data_dir);
        }

        let record = match ctx.containers.ensure(&request).await {
            Ok(record) => record,
            Err(e) => {
                if let Some(dir) = fresh_cache_dir
                    && let Err(remove_err) = tokio::fs::remove_dir_all(&dir).await
                {
                    tracing::debug!("Failed to remove '{}': {}", dir.display(), remove_err);
                }
                return Err(e.into());
            }
        };
        let service = self.instantiate(app, &record);

        if self.wait_ready {
            let failure = match wait_until_available(service.as_ref(), ctx.readiness).await {
                Ok(true) => None,
                Ok(false) => Some(ProviderError::NotAvailable(format!(
                    "Provider '{}' unavailable after trying {} times",
                    service.name(),
                    ctx.readiness.attempts
                ))),
                Err(e) => Some(ProviderError::Unexpected(e.to_string())),
            };
            if let Some(err) = failure {
                if record.created
                    && let Err(e) = ctx.containers.destroy(&record.name).await
                {
                    tracing::warn!("Failed to remove container '{}': {}", record.name, e);
                }
                return Err(err);
            }
        }

        Ok(Provided {
            service,
            container: Some(record),
            satellite: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::testing::{FakeRuntime, ProbeStep, ScriptedProbe, StubService};

    fn build_stub(_app: &str, record: &ContainerRecord) -> Box<dyn Service> {
        Box::new(StubService::new("Stub").with_env("STUB_PORT", &record.port.to_string()))
    }

    fn build_never_ready(_app: &str, _record: &ContainerRecord) -> Box<dyn Service> {
        Box::new(
            StubService::new("Stub")
                .with_probe(Arc::new(ScriptedProbe::new(vec![ProbeStep::Retry]))),
        )
    }

    fn build_erroring(_app: &str, _record: &ContainerRecord) -> Box<dyn Service> {
        Box::new(
            StubService::new("Stub")
                .with_probe(Arc::new(ScriptedProbe::new(vec![ProbeStep::Error]))),
        )
    }

    fn write_marker(dir: &Path) -> std::io::Result<()> {
        std::fs::write(dir.join("marker.yml"), "ok\n")
    }

    async fn context(runtime: Arc<FakeRuntime>, cache: &Path) -> ProvideContext {
        let manager = ContainerManager::new(runtime)
            .with_cache_root(cache)
            .with_port_wait(PollPolicy::new(3, Duration::from_millis(5)));
        ProvideContext::new("myapp", Arc::new(manager))
            .with_readiness(PollPolicy::new(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn builds_service_from_container_record() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = Arc::new(FakeRuntime::new().with_image("stub/image").with_host_port(port));
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime, cache.path()).await;

        let provider = ContainerProvider::new("stub/image", 1234, build_stub)
            .with_data_dir("/data")
            .with_prepare(write_marker);
        assert!(provider.is_transient());

        let provided = provider.provide(&ctx).await.unwrap();
        let record = provided.container.unwrap();
        assert!(record.created);
        assert_eq!(
            provided.service.environment().get("STUB_PORT"),
            Some(&port.to_string())
        );
        assert!(
            cache
                .path()
                .join("stub_image__myapp")
                .join("marker.yml")
                .is_file()
        );
    }

    #[tokio::test]
    async fn missing_image_is_recoverable() {
        let runtime = Arc::new(FakeRuntime::new());
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime, cache.path()).await;

        let err = ContainerProvider::new("stub/image", 1234, build_stub)
            .provide(&ctx)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.command(), Some("docker pull stub/image"));
    }

    #[tokio::test]
    async fn never_ready_container_is_removed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = Arc::new(FakeRuntime::new().with_image("stub/image").with_host_port(port));
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime.clone(), cache.path()).await;

        let err = ContainerProvider::new("stub/image", 1234, build_never_ready)
            .wait_until_ready()
            .provide(&ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::NotAvailable(_)));
        assert_eq!(err.to_string(), "Provider 'Stub' unavailable after trying 3 times");
        assert_eq!(runtime.removed_count(), 1);
    }

    #[tokio::test]
    async fn readiness_error_removes_created_container() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = Arc::new(FakeRuntime::new().with_image("stub/image").with_host_port(port));
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime.clone(), cache.path()).await;

        let err = ContainerProvider::new("stub/image", 1234, build_erroring)
            .wait_until_ready()
            .provide(&ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Unexpected(_)));
        assert!(!err.is_recoverable());
        assert_eq!(runtime.removed_count(), 1);
        assert!(!runtime.has_container("stub_image__myapp"));
    }

    #[tokio::test]
    async fn readiness_error_keeps_reused_container() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_host_port(port)
                .with_existing("stub_image__myapp", 1234, true),
        );
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime.clone(), cache.path()).await;

        ContainerProvider::new("stub/image", 1234, build_erroring)
            .wait_until_ready()
            .provide(&ctx)
            .await
            .unwrap_err();

        assert_eq!(runtime.removed_count(), 0);
        assert!(runtime.has_container("stub_image__myapp"));
    }

    #[tokio::test]
    async fn missing_image_leaves_no_cache_directory() {
        let runtime = Arc::new(FakeRuntime::new());
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime, cache.path()).await;

        let err = ContainerProvider::new("stub/image", 1234, build_stub)
            .with_data_dir("/data")
            .with_prepare(write_marker)
            .provide(&ctx)
            .await
            .unwrap_err();

        assert!(err.is_recoverable());
        assert!(!cache.path().join("stub_image__myapp").exists());
    }
}
