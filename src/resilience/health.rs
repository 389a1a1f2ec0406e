//! Rolling session health statistics

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// How many recent errors are retained for post-hoc inspection
const ERROR_WINDOW: usize = 100;

/// One recorded error
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

/// Accumulates request outcomes for one crawl session
///
/// The crawler polls `is_healthy()` between batches and aborts the session
/// when the failure rate exceeds the threshold. With zero requests the
/// monitor reports healthy.
pub struct HealthMonitor {
    error_threshold: f64,
    requests: u64,
    successes: u64,
    failures: u64,
    total_time: Duration,
    error_kinds: HashMap<String, u64>,
    recent_errors: VecDeque<ErrorRecord>,
}

impl HealthMonitor {
    pub fn new(error_threshold: f64) -> Self {
        Self {
            error_threshold,
            requests: 0,
            successes: 0,
            failures: 0,
            total_time: Duration::ZERO,
            error_kinds: HashMap::new(),
            recent_errors: VecDeque::with_capacity(ERROR_WINDOW),
        }
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.requests += 1;
        self.successes += 1;
        self.total_time += elapsed;
    }

    pub fn record_failure(&mut self, kind: &str, message: &str, elapsed: Duration) {
        self.requests += 1;
        self.failures += 1;
        self.total_time += elapsed;
        *self.error_kinds.entry(kind.to_string()).or_insert(0) += 1;

        if self.recent_errors.len() == ERROR_WINDOW {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(ErrorRecord {
            at: Utc::now(),
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Failures as a fraction of all requests; zero when nothing recorded
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.failure_rate() <= self.error_threshold
    }

    pub fn recent_errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.recent_errors.iter()
    }

    /// JSON summary persisted into the session's metadata column
    pub fn snapshot(&self) -> serde_json::Value {
        let average_ms = if self.requests == 0 {
            0.0
        } else {
            self.total_time.as_secs_f64() * 1000.0 / self.requests as f64
        };

        json!({
            "requests": self.requests,
            "successes": self.successes,
            "failures": self.failures,
            "failure_rate": self.failure_rate(),
            "average_request_ms": average_ms,
            "error_kinds": self.error_kinds,
        })
    }
}
