//! Retry with exponential backoff
//!
//! A single higher-order helper shared by every client that talks to a flaky
//! remote service. The operation is retried on any error; the delay doubles
//! after each failed attempt (`base`, `2 * base`, `4 * base`, ...). Once the
//! attempt budget is spent the caller gets a [`RetryError`] naming the attempt
//! count and the last underlying error.
//!
//! Never wrap a state-mutating chain transaction in this helper: resubmitting
//! a registration can register the same content twice.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of attempts (including the first one)
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Attempt budget and backoff base for [`retry_with_backoff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero is treated as one.
    pub attempts: u32,
    /// Delay after the first failure; doubled after every further failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// A policy that performs exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Every attempt failed
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempts: {last}")]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E> RetryError<E> {
    pub fn into_last(self) -> E {
        self.last
    }
}

/// Run `operation` until it succeeds or the policy's attempt budget is spent.
///
/// `operation` is called once per attempt and must build a fresh future each
/// time. Errors are logged at `warn` with the attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(operation = label, attempt, max_attempts = attempts, "Attempting operation");

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    operation = label,
                    attempts,
                    error = %e,
                    "Operation failed, retry budget exhausted"
                );
                return Err(RetryError { attempts, last: e });
            }
        }
    }
}
