//! Bounded retry policies for receipts and readiness waits.

use crate::core::error::{DeployError, DeployResult};
use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Poll `check` until it reports `true`.
    ///
    /// Errors from `check` end the wait immediately. Running out of attempts
    /// fails with `RetriesExhausted`.
    pub async fn poll_until<F, Fut>(&self, what: &str, mut check: F) -> DeployResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<bool>>,
    {
        for attempt in 1..=self.attempts {
            if check().await? {
                return Ok(());
            }
            if attempt < self.attempts {
                tracing::trace!(what, attempt, "not ready, waiting");
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(DeployError::RetriesExhausted {
            what: what.to_string(),
            attempts: self.attempts,
        })
    }

    /// Run `op`, retrying errors for which `retryable` returns true.
    ///
    /// Non-retryable errors are converted and propagated. Running out of
    /// attempts fails with `RetriesExhausted`.
    pub async fn retry_if<T, E, F, Fut, P>(
        &self,
        what: &str,
        mut op: F,
        retryable: P,
    ) -> DeployResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display + Into<DeployError>,
        P: Fn(&E) -> bool,
    {
        for attempt in 1..=self.attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) => {
                    tracing::debug!(what, attempt, error = %e, "retryable failure");
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DeployError::RetriesExhausted {
            what: what.to_string(),
            attempts: self.attempts,
        })
    }
}
