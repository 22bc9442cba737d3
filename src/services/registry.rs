//! Registry of the services forklift knows how to provide.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::services::provider::Provider;
use crate::services::{amqp, elasticsearch, email, memcache, postgres, proxy, redis, syslog};

/// Static description of a service: its name, what may be overridden, and
/// the providers to try, in order.
pub struct ServiceDescriptor {
    /// Registry key, as used in configuration (`postgres`).
    pub key: &'static str,
    /// Display name (`PostgreSQL`).
    pub name: &'static str,
    pub allow_override: &'static [&'static str],
    /// Attributes that take a list of values (hosts, urls).
    pub allow_override_list: &'static [&'static str],
    pub providers: Vec<Arc<dyn Provider>>,
}

impl ServiceDescriptor {
    pub fn new(key: &'static str, name: &'static str) -> Self {
        Self {
            key,
            name,
            allow_override: &[],
            allow_override_list: &[],
            providers: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, keys: &'static [&'static str]) -> Self {
        self.allow_override = keys;
        self
    }

    pub fn with_list_overrides(mut self, keys: &'static [&'static str]) -> Self {
        self.allow_override_list = keys;
        self
    }

    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Whether `key` may be overridden from configuration.
    pub fn allows(&self, key: &str) -> bool {
        self.allow_override.contains(&key) || self.is_list_override(key)
    }

    pub fn is_list_override(&self, key: &str) -> bool {
        self.allow_override_list.contains(&key)
    }

    /// Every overridable attribute, scalar ones first.
    pub fn override_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.allow_override
            .iter()
            .chain(self.allow_override_list.iter())
            .copied()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("providers", &self.provider_names())
            .finish()
    }
}

/// Ordered collection of service descriptors.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in service.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(postgres::descriptor());
        registry.register(postgres::postgis_descriptor());
        registry.register(elasticsearch::descriptor());
        registry.register(memcache::descriptor());
        registry.register(redis::descriptor());
        registry.register(amqp::descriptor());
        registry.register(proxy::descriptor());
        registry.register(email::descriptor());
        registry.register(syslog::descriptor());
        registry
    }

    /// Add a descriptor, replacing any with the same key.
    pub fn register(&mut self, descriptor: ServiceDescriptor) {
        self.descriptors.retain(|d| d.key != descriptor.key);
        self.descriptors.push(descriptor);
    }

    pub fn get(&self, key: &str) -> Option<&ServiceDescriptor> {
        self.descriptors.iter().find(|d| d.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.descriptors.iter()
    }

    /// Look up every requested key, failing on the first unknown one.
    pub fn resolve<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<&ServiceDescriptor>, ConfigError> {
        keys.iter()
            .map(|key| {
                self.get(key.as_ref())
                    .ok_or_else(|| ConfigError::UnknownService(key.as_ref().to_string()))
            })
            .collect()
    }
}
