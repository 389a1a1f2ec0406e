//! Trolley: a grocery-site crawl orchestrator
//!
//! This crate implements the crawl core for a supermarket catalogue: a durable
//! prioritized work queue, resilience primitives (rate limiting, circuit
//! breaking, retry with backoff, health tracking), staged crawlers for
//! category discovery, product listings and product detail/nutrition pages,
//! and a tiered egress-proxy pool with cost-aware selection.

pub mod config;
pub mod crawler;
pub mod events;
pub mod extract;
pub mod proxy;
pub mod queue;
pub mod resilience;
pub mod session;
pub mod state;
pub mod storage;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Trolley operations
#[derive(Debug, Error)]
pub enum TrolleyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Error page detected at {url}: {marker}")]
    ErrorPage { url: String, marker: String },

    #[error("Session handle is dead: {0}")]
    SessionDead(String),

    #[error("Session permanently failed after {restarts} restart attempts")]
    SessionFailed { restarts: u32 },

    #[error("Session health degraded: failure rate {rate:.1}% over {requests} requests")]
    Unhealthy { rate: f64, requests: u64 },

    #[error("Circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TrolleyError>,
    },

    #[error("Category hierarchy violation: {0}")]
    HierarchyViolation(String),

    #[error("Session {session_id} is already running (use --force to override)")]
    SessionActive { session_id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrolleyError {
    /// Returns true if the error is worth retrying.
    ///
    /// Transient errors are retried by `with_retry` and revert queue items to
    /// pending; everything else propagates immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } | Self::ErrorPage { .. } => true,
            // Server-side trouble and throttling are temporary; client errors are not.
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            // A dead session must escape the retry loop unwrapped; the page
            // session rebuilds its client and retries the fetch itself.
            Self::SessionDead(_) => false,
            _ => false,
        }
    }

    /// Returns true if the error must terminate the owning crawl session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionFailed { .. } | Self::Unhealthy { .. })
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Trolley operations
pub type Result<T> = std::result::Result<T, TrolleyError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{CrawlStatus, ProxyStatus, ProxyTier, QueueStatus, QueueType};

/// Computes the SHA-256 dedup key for a URL.
///
/// Queue rows are keyed on (url_hash, queue_type) so the same URL can be
/// queued once per stage but never twice within one.
pub fn url_hash(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_hash_is_stable() {
        let a = url_hash("https://groceries.example.com/dept/fresh");
        let b = url_hash("https://groceries.example.com/dept/fresh");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_url_hash_differs_by_url() {
        assert_ne!(url_hash("https://a.example/x"), url_hash("https://a.example/y"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TrolleyError::Timeout {
            url: "https://x".into()
        }
        .is_transient());
        assert!(TrolleyError::Http {
            url: "https://x".into(),
            status: 503
        }
        .is_transient());
        assert!(TrolleyError::Http {
            url: "https://x".into(),
            status: 429
        }
        .is_transient());
        assert!(!TrolleyError::Http {
            url: "https://x".into(),
            status: 404
        }
        .is_transient());
        assert!(!TrolleyError::SessionDead("tcp reset".into()).is_transient());
        assert!(!TrolleyError::SessionFailed { restarts: 3 }.is_transient());
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(TrolleyError::SessionFailed { restarts: 3 }.is_session_fatal());
        assert!(TrolleyError::Unhealthy {
            rate: 42.0,
            requests: 100
        }
        .is_session_fatal());
        assert!(!TrolleyError::Timeout {
            url: "https://x".into()
        }
        .is_session_fatal());
    }
}
