//! Retry wrapper for provider calls
//!
//! Cloud control planes throttle and drop connections routinely, so
//! every read the discovery phase issues goes through
//! [`call_with_retry`]. Only errors the provider marks retryable are
//! replayed; authorization and not-found failures surface immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::ProviderError;

/// Backoff schedule for retryable provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt, capped at
    /// 16x the base.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 25% random jitter so parallel
    /// discovery calls do not re-synchronize against the throttle.
    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay * 2u32.pow(attempt.min(4));
        let jitter = rand::rng().random_range(0.0..0.25);
        backoff + backoff.mul_f64(jitter)
    }
}

/// Run a provider call, replaying it on retryable failures.
///
/// `description` names the call in log output. The last error is
/// returned once the policy is exhausted.
pub async fn call_with_retry<T, F, Fut>(
    description: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    "{description} failed transiently (attempt {attempt}/{}): {err}; \
                     retrying in {delay:?}",
                    policy.max_retries
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
