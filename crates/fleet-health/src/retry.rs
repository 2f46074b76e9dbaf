//! Bounded retry combinator.
//!
//! Shared by the cloud-status wait and the reachability probe. Each
//! attempt either finishes (`Ok(Some)`), asks to be retried (`Ok(None)`),
//! or aborts the whole loop (`Err`). Attempts are separated by a fixed
//! interval; no sleep follows the last attempt.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use fleet_core::{FleetError, FleetResult};

/// Attempt budget for one bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub interval: Duration,
    /// Per-attempt deadline. An attempt that overruns counts as a retry.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Run `op` until it yields a value or the budget runs out.
///
/// `op` receives the 1-based attempt number. On exhaustion the error
/// built by `on_exhausted` is returned.
pub async fn retry_bounded<T, F, Fut, E>(policy: &RetryPolicy, mut op: F, on_exhausted: E) -> FleetResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = FleetResult<Option<T>>>,
    E: FnOnce() -> FleetError,
{
    for attempt in 1..=policy.max_attempts {
        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    debug!(attempt, timeout_ms = limit.as_millis() as u64, "attempt timed out");
                    None
                }
            },
            None => op(attempt).await?,
        };

        if let Some(value) = outcome {
            return Ok(value);
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(on_exhausted())
}
