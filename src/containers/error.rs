//! Error types for container lifecycle management.

use thiserror::Error;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur while ensuring or destroying a service container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The Docker daemon could not be reached.
    #[error("Cannot connect to Docker daemon: {reason}")]
    DaemonUnavailable {
        /// Reason why Docker is unavailable.
        reason: String,
        /// Command that brings the daemon up, when the cause is known.
        fix: Option<String>,
    },

    /// The image is not present locally. Images are never pulled implicitly.
    #[error("Docker image {image} is required.")]
    ImageRequired {
        /// Image name.
        image: String,
    },

    /// The container started but its forwarded port never accepted a connection.
    #[error("Docker container {image} was started but couldn't connect on port {port}")]
    RefusingConnections {
        /// Image name.
        image: String,
        /// Forwarded host port.
        port: u16,
    },

    /// The container does not forward the requested port.
    #[error("Container '{name}' does not forward port {port}")]
    PortNotForwarded {
        /// Container name.
        name: String,
        /// Port inside the container.
        port: u16,
    },

    /// Docker API call failed.
    #[error("Docker {operation} failed for '{name}': {reason}")]
    Api {
        /// What was being attempted (create, start, ...).
        operation: &'static str,
        /// Container or image name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// I/O error (cache directory handling).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Command the user can run to fix the error, if there is one.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::ImageRequired { image } => Some(format!("docker pull {image}")),
            Self::DaemonUnavailable { fix, .. } => fix.clone(),
            _ => None,
        }
    }

    /// Whether trying another provider is a sensible reaction to this error.
    pub fn is_provider_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DaemonUnavailable { .. }
                | Self::ImageRequired { .. }
                | Self::RefusingConnections { .. }
        )
    }
}
