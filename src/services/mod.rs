//! Backing services and the providers that obtain them.
//!
//! Each service is described once in the [`ServiceRegistry`]: its display
//! name, which attributes configuration may override, and an ordered list of
//! providers. Provisioning walks that list until a provider hands back an
//! instance that answers its availability probe.
//!
//! ```text
//!   registry key ──▶ ServiceDescriptor ──▶ [localhost, container, ...]
//!                                                │
//!                                  provider.provide(ctx)
//!                                                │
//!                                                ▼
//!                         Box<dyn Service> + overrides ──▶ available()?
//!                                                │ yes
//!                                                ▼
//!                                         ServiceInstance
//!                              (environment, cleanup bookkeeping)
//! ```
//!
//! Most services keep their connection details as [`Endpoints`]: one or
//! more URLs whose parts can be read and replaced individually.

pub mod amqp;
pub mod availability;
pub mod elasticsearch;
pub mod email;
pub mod endpoints;
pub mod error;
pub mod instance;
pub mod memcache;
pub mod orchestrator;
pub mod postgres;
pub mod provider;
pub mod proxy;
pub mod redis;
pub mod registry;
pub mod service;
pub mod syslog;

pub use availability::{Availability, available, wait_until_available};
pub use endpoints::{Endpoint, EndpointError, Endpoints, Part};
pub use error::{ProviderError, ServiceError};
pub use instance::ServiceInstance;
pub use orchestrator::{provide, provide_all, validate_overrides};
pub use provider::{ContainerProvider, ProvideContext, Provided, Provider};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use service::{OverrideValue, Overrides, Service};
