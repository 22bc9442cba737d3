//! Error types for service providers and availability probes.

use thiserror::Error;

use crate::containers::ContainerError;

/// Errors raised by a provider while producing a service instance.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider cannot serve this run; the next provider should be tried.
    #[error("{0}")]
    NotAvailable(String),

    /// Something must be installed or fetched before the provider works.
    #[error("{message}")]
    DependencyRequired {
        /// What is missing.
        message: String,
        /// Command that fixes it, if known.
        command: Option<String>,
    },

    /// Container handling failed in a way another provider would not fix.
    #[error(transparent)]
    Container(ContainerError),

    /// Anything else. Aborts provisioning.
    #[error("{0}")]
    Unexpected(String),
}

impl ProviderError {
    /// Whether the orchestrator should move on to the next provider.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotAvailable(_) | Self::DependencyRequired { .. })
    }

    /// Remediation command attached to the error.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::DependencyRequired { command, .. } => command.as_deref(),
            _ => None,
        }
    }
}

impl From<ContainerError> for ProviderError {
    fn from(err: ContainerError) -> Self {
        if !err.is_provider_unavailable() {
            return Self::Container(err);
        }
        match err.remediation() {
            Some(command) => Self::DependencyRequired {
                message: err.to_string(),
                command: Some(command),
            },
            None => Self::NotAvailable(err.to_string()),
        }
    }
}

/// Unexpected failures while probing a service.
///
/// Expected conditions (refused connections, a server still starting) are
/// reported through [`Availability`](super::Availability) instead.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
