//! Token-bucket request throttle

use crate::config::RateLimitConfig;
use std::time::{Duration, Instant};

/// Token-bucket rate limiter
///
/// Tokens refill continuously at `max_requests / window` and are capped at
/// `capacity`, so bursts up to the capacity proceed immediately while the
/// sustained rate never exceeds the configured window bound.
///
/// Methods take an explicit `now` so tests can drive time deterministically;
/// `acquire` is the async entry point the session uses.
pub struct RateLimiter {
    capacity: f64,
    /// Tokens per second
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.capacity.max(1) as f64;
        let rate = config.max_requests as f64 / config.window_secs.max(1) as f64;
        Self {
            capacity,
            rate,
            // Bucket starts full so the first burst is free
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempts to take one token at `now`
    ///
    /// Returns `Err(wait)` with the time until a token becomes available when
    /// the bucket is empty.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.rate))
        }
    }

    /// Blocks the caller until a token is available, then consumes it
    pub async fn acquire(&mut self) {
        loop {
            match self.try_acquire(Instant::now()) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Tokens currently available (after a refill at `now`)
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}
