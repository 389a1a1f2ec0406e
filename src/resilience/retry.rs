//! Retry with exponential backoff and jitter

use crate::config::RetryConfig;
use crate::{Result, TrolleyError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff sleeps never exceed this, regardless of attempt count
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff: config.backoff,
            jitter: config.jitter,
        }
    }

    /// Base delay before retrying after `attempt` (0-based) failures
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(MAX_BACKOFF)
    }

    /// Applies +/-50% jitter when enabled
    fn sleep_for(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if !self.jitter {
            return base;
        }
        let factor = rand::rng().random_range(0.5..=1.5);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

/// Runs an operation, retrying transient failures per the policy
///
/// Non-transient errors propagate immediately without a retry. When all
/// attempts fail the last error is wrapped in `RetriesExhausted` so callers
/// can tell an exhausted retry loop from a first-shot failure.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(TrolleyError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                let wait = policy.sleep_for(attempt - 1);
                tracing::debug!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
