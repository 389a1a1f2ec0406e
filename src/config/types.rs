use serde::Deserialize;

/// Main configuration structure for Trolley
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    pub crawler: CrawlerConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(rename = "circuit-breaker", default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub output: OutputConfig,
}

/// Target site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Root URL of the grocery site
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Seed category URLs; when empty, the category mapper falls back to
    /// DOM discovery from the site root
    #[serde(rename = "seed-categories", default)]
    pub seed_categories: Vec<String>,

    /// Best-effort cookie-consent endpoint, relative to base-url
    #[serde(rename = "consent-path", default)]
    pub consent_path: Option<String>,
}

/// Crawl loop behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Attempts before a queue item is failed terminally
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Items claimed per listing batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: u32,

    /// Items claimed per detail batch
    #[serde(rename = "detail-batch-size", default = "default_batch_size")]
    pub detail_batch_size: u32,

    /// Pause between detail batches (milliseconds)
    #[serde(rename = "inter-batch-delay-ms", default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,

    /// Pagination safety cap per category page
    #[serde(rename = "max-pages-per-category", default = "default_max_pages")]
    pub max_pages_per_category: u32,

    /// Seconds a processing lease may go stale before the reaper requeues it
    #[serde(rename = "lease-timeout-secs", default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,

    /// Failure-rate ceiling before the health monitor aborts the session
    #[serde(rename = "error-threshold", default = "default_error_threshold")]
    pub error_threshold: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_batch_size() -> u32 {
    10
}

fn default_inter_batch_delay() -> u64 {
    2000
}

fn default_max_pages() -> u32 {
    100
}

fn default_lease_timeout() -> u64 {
    300
}

fn default_error_threshold() -> f64 {
    0.10
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
            detail_batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay(),
            max_pages_per_category: default_max_pages(),
            lease_timeout_secs: default_lease_timeout(),
            error_threshold: default_error_threshold(),
        }
    }
}

/// Token-bucket rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per rolling window
    #[serde(rename = "max-requests", default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(rename = "window-secs", default = "default_window_secs")]
    pub window_secs: u64,

    /// Burst capacity of the bucket
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_max_requests() -> u32 {
    30
}

fn default_window_secs() -> u64 {
    60
}

fn default_capacity() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            capacity: default_capacity(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures (decaying counter) before the breaker opens
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before a half-open probe is allowed (seconds)
    #[serde(rename = "recovery-timeout-secs", default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,

    /// Consecutive half-open successes needed to close again
    #[serde(rename = "success-threshold", default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(rename = "max-attempts", default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(rename = "initial-delay-ms", default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Multiplier applied per attempt
    #[serde(default = "default_backoff")]
    pub backoff: f64,

    /// Apply +/-50% jitter to each sleep
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_backoff() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff: default_backoff(),
            jitter: default_jitter(),
        }
    }
}

/// Page session (HTTP client) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// User agent presented to the site
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive setup failures before the session is abandoned
    #[serde(rename = "max-restarts", default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Randomized post-load delay bounds in milliseconds
    #[serde(rename = "human-delay-ms", default = "default_human_delay")]
    pub human_delay_ms: (u64, u64),
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_restarts() -> u32 {
    3
}

fn default_human_delay() -> (u64, u64) {
    (500, 2000)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_restarts: default_max_restarts(),
            human_delay_ms: default_human_delay(),
        }
    }
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Route page requests through selected proxies
    #[serde(default)]
    pub enabled: bool,

    /// Try premium/standard tiers before free
    #[serde(rename = "prefer-paid", default = "default_prefer_paid")]
    pub prefer_paid: bool,

    /// Fall back to the free tier when paid tiers are exhausted
    #[serde(rename = "fallback-to-free", default = "default_fallback")]
    pub fallback_to_free: bool,

    /// Minimum success rate for a proxy to stay selectable
    #[serde(rename = "min-success-rate", default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Consecutive failures before a proxy is blacklisted
    #[serde(rename = "blacklist-after-failures", default = "default_blacklist_after")]
    pub blacklist_after_failures: u32,

    /// IP-echo endpoint used to validate harvested proxies
    #[serde(rename = "validation-url", default = "default_validation_url")]
    pub validation_url: String,

    /// Probe timeout in seconds
    #[serde(rename = "validation-timeout-secs", default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// Public free-proxy list sources
    #[serde(rename = "free-sources", default = "default_free_sources")]
    pub free_sources: Vec<String>,
}

fn default_prefer_paid() -> bool {
    true
}

fn default_fallback() -> bool {
    true
}

fn default_min_success_rate() -> f64 {
    0.5
}

fn default_blacklist_after() -> u32 {
    5
}

fn default_validation_url() -> String {
    "https://httpbin.org/ip".to_string()
}

fn default_validation_timeout() -> u64 {
    5
}

fn default_free_sources() -> Vec<String> {
    vec![
        "https://www.proxy-list.download/api/v1/get?type=http".to_string(),
        "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http".to_string(),
        "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt".to_string(),
    ]
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefer_paid: default_prefer_paid(),
            fallback_to_free: default_fallback(),
            min_success_rate: default_min_success_rate(),
            blacklist_after_failures: default_blacklist_after(),
            validation_url: default_validation_url(),
            validation_timeout_secs: default_validation_timeout(),
            free_sources: default_free_sources(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}
