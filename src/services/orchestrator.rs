//! Provider selection.
//!
//! ```text
//!   for provider in descriptor.providers:
//!       skip if transient run and provider is not transient
//!       provide ──not available──▶ next provider
//!          │
//!          ▼
//!       apply overrides ──invalid──▶ ConfigError (after cleanup)
//!          │
//!          ▼
//!       available? ──yes──▶ Ready
//!          │ no                └─error──▶ cleanup, ProvisionError
//!          ▼
//!       cleanup, next provider
//!   ConfigError::NoAvailableProvider
//! ```

use std::collections::BTreeMap;

use crate::error::{ConfigError, ProviderAttempt, ProvisionError};
use crate::services::availability::available;
use crate::services::instance::ServiceInstance;
use crate::services::provider::ProvideContext;
use crate::services::registry::{ServiceDescriptor, ServiceRegistry};
use crate::services::service::{Overrides, Service};

/// Reject override keys the service does not know about.
pub fn validate_overrides(
    descriptor: &ServiceDescriptor,
    overrides: &Overrides,
) -> Result<(), ConfigError> {
    match overrides.keys().find(|key| !descriptor.allows(key)) {
        Some(key) => Err(ConfigError::InvalidOverride {
            service: descriptor.name.to_string(),
            key: key.clone(),
        }),
        None => Ok(()),
    }
}

fn apply_overrides(
    descriptor: &ServiceDescriptor,
    service: &mut dyn Service,
    overrides: &Overrides,
) -> Result<(), ConfigError> {
    validate_overrides(descriptor, overrides)?;
    for (key, value) in overrides {
        service.apply_override(key, value)?;
        if key.contains("password") {
            tracing::debug!("Config for {}: {} = ****", descriptor.name, key);
        } else {
            tracing::debug!("Config for {}: {} = {}", descriptor.name, key, value);
        }
    }
    Ok(())
}

/// Obtain a working instance of a service from the first provider that can
/// produce one.
///
/// With `transient` set, only providers of disposable resources are tried.
pub async fn provide(
    descriptor: &ServiceDescriptor,
    ctx: &ProvideContext,
    overrides: &Overrides,
    transient: bool,
) -> Result<ServiceInstance, ProvisionError> {
    // Typos fail before anything gets started.
    validate_overrides(descriptor, overrides)?;

    let mut attempts = Vec::new();

    for provider in &descriptor.providers {
        if transient && !provider.is_transient() {
            tracing::debug!(
                "Skipping {} provider for {}: not transient",
                provider.name(),
                descriptor.name
            );
            attempts.push(ProviderAttempt {
                provider: provider.name().to_string(),
                reason: "skipped, not transient".to_string(),
            });
            continue;
        }

        tracing::debug!(
            "Trying {} provider for {} service",
            provider.name(),
            descriptor.name
        );

        let provided = match provider.provide(ctx).await {
            Ok(provided) => provided,
            Err(e) if e.is_recoverable() => {
                eprintln!(
                    "While trying '{}' provider for {}: {}",
                    provider.name(),
                    descriptor.name,
                    e
                );
                if let Some(command) = e.command() {
                    eprintln!("  To fix, run: {command}");
                }
                attempts.push(ProviderAttempt {
                    provider: provider.name().to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
            Err(e) => {
                return Err(ProvisionError::Provider {
                    service: descriptor.name.to_string(),
                    provider: provider.name().to_string(),
                    source: e,
                });
            }
        };

        let mut instance =
            ServiceInstance::new(descriptor.key, provider.name(), provided, ctx.containers.clone());

        if let Err(e) = apply_overrides(descriptor, instance.service_mut(), overrides) {
            instance.discard().await;
            return Err(e.into());
        }

        match available(instance.service()).await {
            Ok(true) => {
                tracing::info!(
                    "{} provided by '{}' provider",
                    descriptor.name,
                    provider.name()
                );
                return Ok(instance);
            }
            Ok(false) => {
                tracing::warn!(
                    "{} from '{}' provider is not available",
                    descriptor.name,
                    provider.name()
                );
                attempts.push(ProviderAttempt {
                    provider: provider.name().to_string(),
                    reason: "not available".to_string(),
                });
                instance.discard().await;
            }
            Err(e) => {
                instance.discard().await;
                return Err(ProvisionError::Service {
                    service: descriptor.name.to_string(),
                    source: e,
                });
            }
        }
    }

    Err(ConfigError::NoAvailableProvider {
        service: descriptor.name.to_string(),
        attempts,
    }
    .into())
}

/// Provide every requested service, in order.
///
/// If one of them fails, the instances already provided are discarded
/// (containers created by this run are destroyed, satellites stopped)
/// before the error is returned.
pub async fn provide_all<S: AsRef<str>>(
    registry: &ServiceRegistry,
    keys: &[S],
    ctx: &ProvideContext,
    overrides: &BTreeMap<String, Overrides>,
    transient: bool,
) -> Result<Vec<ServiceInstance>, ProvisionError> {
    let descriptors = registry.resolve(keys)?;
    let empty = Overrides::new();
    let mut instances = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let service_overrides = overrides.get(descriptor.key).unwrap_or(&empty);
        match provide(descriptor, ctx, service_overrides, transient).await {
            Ok(instance) => instances.push(instance),
            Err(e) => {
                for instance in &mut instances {
                    instance.discard().await;
                }
                return Err(e);
            }
        }
    }
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::containers::{ContainerManager, ContainerRecord};
    use crate::services::error::ProviderError;
    use crate::services::provider::{CONTAINER, Provided, Provider};
    use crate::services::service::OverrideValue;
    use crate::testing::{FakeRuntime, ProbeStep, ScriptedProbe, StubService};
    use crate::wait::PollPolicy;

    /// Provider returning a fresh stub per call with a scripted probe.
    struct StubProvider {
        name: &'static str,
        transient: bool,
        outcome: Outcome,
    }

    #[derive(Clone)]
    enum Outcome {
        NotAvailable,
        Fails,
        Service(ProbeStep),
        CreatedContainer(ProbeStep),
    }

    impl StubProvider {
        fn new(name: &'static str, outcome: Outcome) -> Self {
            Self {
                name,
                transient: false,
                outcome,
            }
        }

        fn transient(mut self) -> Self {
            self.transient = true;
            self
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_transient(&self) -> bool {
            self.transient
        }

        async fn provide(&self, ctx: &ProvideContext) -> Result<Provided, ProviderError> {
            let stub = |step: &ProbeStep| {
                StubService::new("Stub")
                    .with_probe(Arc::new(ScriptedProbe::new(vec![*step])))
            };
            match &self.outcome {
                Outcome::NotAvailable => Err(ProviderError::NotAvailable(format!(
                    "{} is down for {}",
                    self.name, ctx.application_id
                ))),
                Outcome::Fails => Err(ProviderError::Unexpected("boom".to_string())),
                Outcome::Service(step) => Ok(Provided::new(stub(step))),
                Outcome::CreatedContainer(step) => {
                    Ok(Provided::new(stub(step)).with_container(ContainerRecord {
                        image: "stub".to_string(),
                        name: "stub__myapp".to_string(),
                        host: "localhost".to_string(),
                        port: 1,
                        ip_address: None,
                        cache_dir: None,
                        created: true,
                    }))
                }
            }
        }
    }

    fn descriptor(providers: Vec<StubProvider>) -> ServiceDescriptor {
        providers.into_iter().fold(
            ServiceDescriptor::new("stub", "Stub").with_overrides(&["host"]),
            |d, p| d.with_provider(p),
        )
    }

    fn context(runtime: Arc<FakeRuntime>, cache: &std::path::Path) -> ProvideContext {
        let manager = ContainerManager::new(runtime)
            .with_cache_root(cache)
            .with_port_wait(PollPolicy::new(1, Duration::from_millis(1)));
        ProvideContext::new("myapp", Arc::new(manager))
    }

    #[tokio::test]
    async fn falls_through_unavailable_providers() {
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(FakeRuntime::new()), cache.path());
        let descriptor = descriptor(vec![
            StubProvider::new("localhost", Outcome::NotAvailable),
            StubProvider::new("manual", Outcome::Service(ProbeStep::Ready)),
        ]);

        let instance = provide(&descriptor, &ctx, &Overrides::new(), false)
            .await
            .unwrap();
        assert_eq!(instance.provided_by(), "manual");
        assert!(descriptor.provider_names().contains(&instance.provided_by()));
    }

    #[tokio::test]
    async fn no_provider_error_names_service_and_attempts() {
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(FakeRuntime::new()), cache.path());
        let descriptor = descriptor(vec![
            StubProvider::new("localhost", Outcome::NotAvailable),
            StubProvider::new("manual", Outcome::Service(ProbeStep::Retry)),
        ]);

        let err = provide(&descriptor, &ctx, &Overrides::new(), false)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("No available providers for service Stub."));
        assert!(message.contains("localhost: localhost is down for myapp"));
        assert!(message.contains("manual: not available"));
    }

    #[tokio::test]
    async fn transient_skips_non_transient_providers() {
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(FakeRuntime::new()), cache.path());
        let descriptor = descriptor(vec![
            StubProvider::new("localhost", Outcome::Service(ProbeStep::Ready)),
            StubProvider::new(CONTAINER, Outcome::Service(ProbeStep::Ready)).transient(),
        ]);

        let instance = provide(&descriptor, &ctx, &Overrides::new(), true)
            .await
            .unwrap();
        assert_eq!(instance.provided_by(), CONTAINER);
    }

    #[tokio::test]
    async fn invalid_override_fails_before_any_provider_runs() {
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(FakeRuntime::new()), cache.path());
        let descriptor = descriptor(vec![StubProvider::new(
            "localhost",
            Outcome::Service(ProbeStep::Ready),
        )]);
        let overrides = Overrides::from([("hots".to_string(), OverrideValue::scalar("db"))]);

        let err = provide(&descriptor, &ctx, &overrides, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter hots for service Stub.");
    }

    #[tokio::test]
    async fn overrides_are_applied() {
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(FakeRuntime::new()), cache.path());
        let descriptor = descriptor(vec![StubProvider::new(
            "localhost",
            Outcome::Service(ProbeStep::Ready),
        )]);
        let overrides = Overrides::from([("host".to_string(), OverrideValue::scalar("db"))]);

        let instance = provide(&descriptor, &ctx, &overrides, false)
            .await
            .unwrap();
        assert_eq!(
            instance.service().get_override("host"),
            Some(OverrideValue::scalar("db"))
        );
    }

    #[tokio::test]
    async fn unavailable_created_container_is_cleaned_before_next_provider() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("stub__myapp", 1, true));
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime.clone(), cache.path());
        let descriptor = descriptor(vec![
            StubProvider::new(CONTAINER, Outcome::CreatedContainer(ProbeStep::Fatal)),
            StubProvider::new("manual", Outcome::Service(ProbeStep::Ready)),
        ]);

        let instance = provide(&descriptor, &ctx, &Overrides::new(), false)
            .await
            .unwrap();
        assert_eq!(instance.provided_by(), "manual");
        assert_eq!(runtime.removed_count(), 1);
    }

    #[tokio::test]
    async fn probe_error_cleans_up_and_propagates() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("stub__myapp", 1, true));
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime.clone(), cache.path());
        let descriptor = descriptor(vec![
            StubProvider::new(CONTAINER, Outcome::CreatedContainer(ProbeStep::Error)),
            StubProvider::new("manual", Outcome::Service(ProbeStep::Ready)),
        ]);

        let err = provide(&descriptor, &ctx, &Overrides::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Service { .. }));
        assert_eq!(runtime.removed_count(), 1);
    }

    #[tokio::test]
    async fn unexpected_provider_failure_aborts() {
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(Arc::new(FakeRuntime::new()), cache.path());
        let descriptor = descriptor(vec![
            StubProvider::new("localhost", Outcome::Fails),
            StubProvider::new("manual", Outcome::Service(ProbeStep::Ready)),
        ]);

        let err = provide(&descriptor, &ctx, &Overrides::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Provider { ref provider, .. } if provider == "localhost"));
    }

    #[tokio::test]
    async fn provide_all_discards_earlier_instances_on_failure() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("stub__myapp", 1, true));
        let cache = tempfile::tempdir().unwrap();
        let ctx = context(runtime.clone(), cache.path());

        let mut registry = ServiceRegistry::new();
        registry.register(
            ServiceDescriptor::new("first", "First").with_provider(StubProvider::new(
                CONTAINER,
                Outcome::CreatedContainer(ProbeStep::Ready),
            )),
        );
        registry.register(
            ServiceDescriptor::new("second", "Second")
                .with_provider(StubProvider::new("localhost", Outcome::NotAvailable)),
        );

        let err = provide_all(&registry, &["first", "second"], &ctx, &BTreeMap::new(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Second"));
        assert_eq!(runtime.removed_count(), 1);
    }
}
