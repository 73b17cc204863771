//! Retry with exponential backoff for transient failures.
//!
//! The wrapper does not inspect the error. Only wrap operations that are
//! safe to repeat, such as gateway status reads.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    /// Wait before the first retry.
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(100),
            factor: 2,
        }
    }
}

/// Run `operation`, retrying on `Err` according to `policy`.
///
/// Returns the first success or the error of the last attempt.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = policy.delay;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    attempt,
                    retries = policy.retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(policy.factor);
            }
            Err(e) => return Err(e),
        }
    }
}
