//! Availability classification for provisioned services.

use std::time::Duration;

use crate::containers::port_open;
use crate::services::endpoints::Endpoints;
use crate::services::error::ServiceError;
use crate::services::service::Service;
use crate::wait::PollPolicy;

/// Timeout for a single TCP connection attempt in a probe.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a single availability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// The service answers.
    Ready,
    /// Not yet; waiting may help (connection refused, server starting).
    Retry(String),
    /// Waiting will not help (dependency missing, probe cannot run).
    Fatal(String),
}

impl Availability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ready => None,
            Self::Retry(reason) | Self::Fatal(reason) => Some(reason),
        }
    }
}

/// Probe once and fold expected failures into `false`.
///
/// Only unexpected errors are returned as `Err`.
pub async fn available(service: &dyn Service) -> Result<bool, ServiceError> {
    match service.check_available().await? {
        Availability::Ready => Ok(true),
        Availability::Retry(reason) | Availability::Fatal(reason) => {
            tracing::debug!("{} is not available: {}", service.name(), reason);
            Ok(false)
        }
    }
}

/// Probe until the service is ready, a fatal condition is reported, or the
/// policy's attempts run out.
///
/// A fatal condition returns `false` straight away without using up the
/// remaining attempts.
pub async fn wait_until_available(
    service: &dyn Service,
    policy: PollPolicy,
) -> Result<bool, ServiceError> {
    for attempt in 1..=policy.attempts {
        match service.check_available().await? {
            Availability::Ready => return Ok(true),
            Availability::Fatal(reason) => {
                tracing::warn!("Error checking for {}: {}", service.name(), reason);
                return Ok(false);
            }
            Availability::Retry(reason) => {
                tracing::debug!(
                    "{} not ready (attempt {}/{}): {}",
                    service.name(),
                    attempt,
                    policy.attempts,
                    reason
                );
            }
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Ok(false)
}

/// Whether at least one endpoint accepts a TCP connection.
pub async fn any_reachable(endpoints: &Endpoints, default_port: u16) -> bool {
    let probes = endpoints.iter().map(|endpoint| {
        port_open(&endpoint.host, endpoint.port.unwrap_or(default_port), CONNECT_TIMEOUT)
    });
    futures::future::join_all(probes)
        .await
        .into_iter()
        .any(|open| open)
}
