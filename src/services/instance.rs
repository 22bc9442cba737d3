//! A provisioned service, tagged with the provider that produced it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::containers::{ContainerError, ContainerManager, ContainerRecord};
use crate::satellite::Satellite;
use crate::services::provider::{CONTAINER, Provided};
use crate::services::service::Service;

/// A service instance ready to be handed to a driver.
#[derive(Debug)]
pub struct ServiceInstance {
    key: &'static str,
    provided_by: &'static str,
    service: Box<dyn Service>,
    container: Option<ContainerRecord>,
    satellite: Option<Satellite>,
    containers: Arc<ContainerManager>,
    destroyed: bool,
}

impl ServiceInstance {
    pub fn new(
        key: &'static str,
        provided_by: &'static str,
        provided: Provided,
        containers: Arc<ContainerManager>,
    ) -> Self {
        Self {
            key,
            provided_by,
            service: provided.service,
            container: provided.container,
            satellite: provided.satellite,
            containers,
            destroyed: false,
        }
    }

    /// Registry key of the service (`postgres`, `redis`, ...).
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Name of the provider that produced this instance.
    pub fn provided_by(&self) -> &'static str {
        self.provided_by
    }

    pub fn service(&self) -> &dyn Service {
        self.service.as_ref()
    }

    pub fn service_mut(&mut self) -> &mut dyn Service {
        self.service.as_mut()
    }

    pub fn environment(&self) -> BTreeMap<String, String> {
        self.service.environment()
    }

    pub fn container(&self) -> Option<&ContainerRecord> {
        self.container.as_ref()
    }

    pub fn satellite(&self) -> Option<&Satellite> {
        self.satellite.as_ref()
    }

    /// Destroy the container behind this instance if this run created it.
    ///
    /// Returns `true` when a container was destroyed. Instances from other
    /// providers, and containers that were merely reused, are left alone.
    pub async fn cleanup(&mut self) -> Result<bool, ContainerError> {
        if self.provided_by != CONTAINER || self.destroyed {
            return Ok(false);
        }
        let Some(record) = &self.container else {
            return Ok(false);
        };
        if !record.created {
            tracing::debug!(
                "Keeping container '{}': it was not created by this run",
                record.name
            );
            return Ok(false);
        }

        self.containers.destroy(&record.name).await?;
        self.destroyed = true;
        Ok(true)
    }

    /// Stop the satellite serving this instance, if any.
    pub async fn stop_satellite(&mut self) {
        if let Some(satellite) = self.satellite.take() {
            satellite.stop().await;
        }
    }

    /// Clean up and stop the satellite, logging rather than returning errors.
    pub async fn discard(&mut self) {
        if let Err(e) = self.cleanup().await {
            tracing::warn!("Failed to clean up {}: {}", self.service.name(), e);
        }
        self.stop_satellite().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, StubService};

    fn record(name: &str, created: bool) -> ContainerRecord {
        ContainerRecord {
            image: "redis".to_string(),
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 32768,
            ip_address: None,
            cache_dir: None,
            created,
        }
    }

    fn manager(runtime: Arc<FakeRuntime>, cache: &std::path::Path) -> Arc<ContainerManager> {
        Arc::new(ContainerManager::new(runtime).with_cache_root(cache))
    }

    #[tokio::test]
    async fn cleanup_is_noop_for_localhost() {
        let runtime = Arc::new(FakeRuntime::new());
        let cache = tempfile::tempdir().unwrap();
        let mut instance = ServiceInstance::new(
            "redis",
            "localhost",
            Provided::new(StubService::new("Redis")),
            manager(runtime.clone(), cache.path()),
        );

        assert!(!instance.cleanup().await.unwrap());
        assert_eq!(runtime.removed_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_destroys_created_container_once() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("redis__myapp", 6379, true));
        let cache = tempfile::tempdir().unwrap();
        let mut instance = ServiceInstance::new(
            "redis",
            CONTAINER,
            Provided::new(StubService::new("Redis")).with_container(record("redis__myapp", true)),
            manager(runtime.clone(), cache.path()),
        );

        assert!(instance.cleanup().await.unwrap());
        assert!(!instance.cleanup().await.unwrap());
        assert_eq!(runtime.removed_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_reused_container() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("redis__myapp", 6379, true));
        let cache = tempfile::tempdir().unwrap();
        let mut instance = ServiceInstance::new(
            "redis",
            CONTAINER,
            Provided::new(StubService::new("Redis")).with_container(record("redis__myapp", false)),
            manager(runtime.clone(), cache.path()),
        );

        assert!(!instance.cleanup().await.unwrap());
        assert!(runtime.has_container("redis__myapp"));
    }
}
