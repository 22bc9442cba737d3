//! Bounded polling helpers.

use std::future::Future;
use std::time::Duration;

/// How many times to poll something and how long to sleep in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of attempts.
    pub attempts: u32,
    /// Delay between two attempts.
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// One attempt per second.
    pub const fn seconds(attempts: u32) -> Self {
        Self::new(attempts, Duration::from_secs(1))
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::seconds(60)
    }
}

/// Call `check` until it returns `true` or the attempts run out.
///
/// There is no sleep after the final attempt.
pub async fn wait_for<F, Fut>(policy: PollPolicy, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=policy.attempts {
        if check().await {
            return true;
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    false
}
