//! Error types shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::containers::ContainerError;
use crate::services::{ProviderError, ServiceError};

/// Configuration errors.
///
/// These are fatal and user-facing: nothing is retried once one is raised.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid parameter {key} for service {service}.")]
    InvalidOverride { service: String, key: String },

    #[error("Invalid value for {service}.{key}: {message}")]
    InvalidOverrideValue {
        service: String,
        key: String,
        message: String,
    },

    #[error("No available providers for service {service}.{}", format_attempts(.attempts))]
    NoAvailableProvider {
        service: String,
        /// Every provider that was tried, with the reason it was rejected.
        attempts: Vec<ProviderAttempt>,
    },

    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read configuration file {}: {message}", path.display())]
    InvalidFile { path: PathBuf, message: String },

    #[error("{0}")]
    Environment(String),
}

/// A provider that was tried while resolving a service and why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub reason: String,
}

fn format_attempts(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("\n  - {}: {}", a.provider, a.reason))
        .collect()
}

/// Errors returned while provisioning a service.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A provider failed in a way that is not a "try the next one" condition.
    #[error("Provider '{provider}' for {service} failed: {source}")]
    Provider {
        service: String,
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// The availability probe failed unexpectedly.
    #[error("Checking {service} availability failed: {source}")]
    Service {
        service: String,
        #[source]
        source: ServiceError,
    },
}

/// Errors raised by the execution drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Driver configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
