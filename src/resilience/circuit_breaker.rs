//! Circuit breaker guarding page navigation

use crate::config::CircuitBreakerConfig;
use crate::{Result, TrolleyError};
use std::time::Instant;

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Refusing calls until the recovery timeout elapses
    Open,
    /// Probing: a limited number of calls go through
    HalfOpen,
}

/// Failure-count circuit breaker
///
/// Closed -> Open once the failure counter reaches `failure_threshold`;
/// Open -> HalfOpen after `recovery_timeout_secs`; HalfOpen -> Closed after
/// `success_threshold` consecutive successes, or straight back to Open on any
/// failure.
///
/// The failure counter decays by one on each closed-state success instead of
/// resetting, so sporadic failures under load don't trip the breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Gate check before invoking the guarded operation
    ///
    /// While open and still inside the cooldown, refuses with the remaining
    /// wait. Once the cooldown has elapsed the breaker moves to half-open and
    /// the call proceeds.
    pub fn try_acquire(&mut self, now: Instant) -> Result<()> {
        if self.state == BreakerState::Open {
            let opened_at = self.opened_at.unwrap_or(now);
            let recovery = std::time::Duration::from_secs(self.config.recovery_timeout_secs);
            let elapsed = now.saturating_duration_since(opened_at);

            if elapsed < recovery {
                return Err(TrolleyError::CircuitOpen {
                    retry_in: recovery - elapsed,
                });
            }

            self.state = BreakerState::HalfOpen;
            self.success_count = 0;
        }

        Ok(())
    }

    /// Records a successful guarded call
    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => {
                // Decay, don't reset
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.state = BreakerState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed guarded call
    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(now);
                }
            }
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
                self.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Runs an operation under the breaker
    ///
    /// Refuses immediately while open; otherwise executes the operation and
    /// updates breaker state from the outcome.
    pub async fn call<F, Fut, T>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.try_acquire(Instant::now())?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(Instant::now());
                Err(e)
            }
        }
    }
}
