//! Resilience primitives guarding page navigation
//!
//! This module contains the building blocks the page session composes around
//! every request:
//! - Token-bucket rate limiting
//! - Circuit breaking with a decaying failure counter
//! - Rolling health statistics for session-level abort decisions
//! - Retry with exponential backoff and jitter

mod circuit_breaker;
mod health;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use health::{ErrorRecord, HealthMonitor};
pub use rate_limiter::RateLimiter;
pub use retry::{with_retry, RetryPolicy};
