//! Page session: the crawl's single HTTP surface
//!
//! One [`PageSession`] stands in for a browser tab: it owns a cookie-carrying
//! HTTP client with a realistic user agent, routes optionally through a
//! proxy, and funnels every page load through the resilience stack in order:
//! rate limiter, then circuit breaker, then retry-with-backoff. A randomized
//! human-like delay follows each successful load.
//!
//! Setup failures rebuild the client up to `max-restarts` times before the
//! session is declared permanently failed, which terminates the owning crawl.

use rand::Rng;
use reqwest::header;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{
    CircuitBreakerConfig, RateLimitConfig, RetryConfig, SessionConfig, SiteConfig,
};
use crate::events::{CrawlEvent, EventSink, Outcome};
use crate::resilience::{with_retry, CircuitBreaker, HealthMonitor, RateLimiter, RetryPolicy};
use crate::{Result, TrolleyError};

/// Body substrings that mean the site served an error page with a 200
const ERROR_PAGE_MARKERS: &[&str] = &[
    "access denied",
    "403 forbidden",
    "404 not found",
    "500 internal server error",
    "service unavailable",
    "robot check",
    "verify you are a human",
];

/// A fetched page
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub body: String,
    pub status: u16,
}

/// Builds the stealth HTTP client the session navigates with
fn build_client(
    session: &SessionConfig,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-GB,en;q=0.9"),
    );

    let mut builder = reqwest::Client::builder()
        .user_agent(session.user_agent.clone())
        .default_headers(headers)
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .timeout(Duration::from_secs(session.timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(proxy_url) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    Ok(builder.build()?)
}

/// One crawl session's page-loading handle
pub struct PageSession {
    client: reqwest::Client,
    session_config: SessionConfig,
    consent_url: Option<String>,
    proxy_url: Option<String>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    health: HealthMonitor,
    restarts: u32,
    events: Arc<dyn EventSink>,
}

impl PageSession {
    /// Sets up a fresh session, retrying client construction per config
    ///
    /// # Arguments
    ///
    /// * `site` - base URL and optional consent path
    /// * `session_config` - user agent, timeout, restart budget, delays
    /// * `proxy_url` - optional egress proxy connection URL
    pub async fn setup(
        site: &SiteConfig,
        session_config: &SessionConfig,
        rate_limit: &RateLimitConfig,
        breaker_config: &CircuitBreakerConfig,
        retry_config: &RetryConfig,
        error_threshold: f64,
        proxy_url: Option<String>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let client = Self::build_with_restarts(session_config, proxy_url.as_deref())?;

        let consent_url = site
            .consent_path
            .as_ref()
            .map(|path| format!("{}{}", site.base_url.trim_end_matches('/'), path));

        let mut session = Self {
            client,
            session_config: session_config.clone(),
            consent_url,
            proxy_url,
            rate_limiter: RateLimiter::new(rate_limit),
            breaker: CircuitBreaker::new(breaker_config.clone()),
            retry: RetryPolicy::from_config(retry_config),
            health: HealthMonitor::new(error_threshold),
            restarts: 0,
            events,
        };

        session.accept_cookies().await;
        Ok(session)
    }

    /// Builds the HTTP client, consuming the restart budget on failure
    fn build_with_restarts(
        session_config: &SessionConfig,
        proxy_url: Option<&str>,
    ) -> Result<reqwest::Client> {
        let mut attempts = 0;
        loop {
            match build_client(session_config, proxy_url) {
                Ok(client) => return Ok(client),
                Err(error) => {
                    attempts += 1;
                    tracing::warn!(attempt = attempts, %error, "session setup failed");
                    if attempts >= session_config.max_restarts {
                        return Err(TrolleyError::SessionFailed { restarts: attempts });
                    }
                }
            }
        }
    }

    /// Best-effort cookie consent; a failure is a warning, never an error
    async fn accept_cookies(&mut self) {
        let Some(consent_url) = self.consent_url.clone() else {
            return;
        };
        match self.client.get(&consent_url).send().await {
            Ok(_) => tracing::debug!(url = %consent_url, "consent endpoint visited"),
            Err(error) => {
                tracing::warn!(url = %consent_url, %error, "cookie consent failed, continuing")
            }
        }
    }

    /// Loads a page through the full resilience stack
    ///
    /// Order of gates: health check, rate limiter (waits), circuit breaker
    /// (refuses fast), then retry-with-backoff around the actual fetch. A
    /// session declared dead mid-flight is rebuilt once before giving up.
    pub async fn navigate(&mut self, url: &str) -> Result<Page> {
        if !self.health.is_healthy() {
            return Err(TrolleyError::Unhealthy {
                rate: self.health.failure_rate() * 100.0,
                requests: self.health.requests(),
            });
        }

        self.rate_limiter.acquire().await;
        self.breaker.try_acquire(Instant::now())?;

        let started = Instant::now();
        let result = match self.fetch_with_retry(url).await {
            Err(TrolleyError::SessionDead(reason)) => {
                tracing::warn!(url, %reason, "session dead, rebuilding client");
                self.rebuild()?;
                self.fetch_with_retry(url).await
            }
            other => other,
        };
        let elapsed = started.elapsed();

        match &result {
            Ok(page) => {
                self.breaker.record_success();
                self.health.record_success(elapsed);
                self.events.emit(
                    CrawlEvent::new("session", Outcome::Success)
                        .with_url(url)
                        .with_duration(elapsed)
                        .with_detail(format!("HTTP {}", page.status)),
                );
                self.human_delay().await;
            }
            Err(error) => {
                self.breaker.record_failure(Instant::now());
                self.health
                    .record_failure(error_kind(error), &error.to_string(), elapsed);
                self.events.emit(
                    CrawlEvent::new("session", Outcome::Failure)
                        .with_url(url)
                        .with_duration(elapsed)
                        .with_detail(error.to_string()),
                );
            }
        }

        result
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Page> {
        let client = self.client.clone();
        let url_owned = url.to_string();
        with_retry(&self.retry, move || {
            let client = client.clone();
            let url = url_owned.clone();
            async move { fetch_once(&client, &url).await }
        })
        .await
    }

    /// Replaces the client after a dead-session detection
    fn rebuild(&mut self) -> Result<()> {
        self.restarts += 1;
        if self.restarts > self.session_config.max_restarts {
            return Err(TrolleyError::SessionFailed {
                restarts: self.restarts,
            });
        }
        self.client = build_client(&self.session_config, self.proxy_url.as_deref())?;
        Ok(())
    }

    async fn human_delay(&self) {
        let (lo, hi) = self.session_config.human_delay_ms;
        if hi == 0 {
            return;
        }
        let millis = if hi > lo {
            rand::rng().random_range(lo..=hi)
        } else {
            lo
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    /// Health snapshot for status reporting
    pub fn health_snapshot(&self) -> serde_json::Value {
        self.health.snapshot()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Best-effort close; never fails
    pub fn teardown(self) {
        tracing::debug!(
            restarts = self.restarts,
            requests = self.health.requests(),
            "session closed"
        );
    }
}

/// One raw page fetch, classified into the error taxonomy
async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<Page> {
    let response = client.get(url).send().await.map_err(|error| {
        if error.is_timeout() {
            TrolleyError::Timeout {
                url: url.to_string(),
            }
        } else if error.is_connect() {
            TrolleyError::Connect {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            TrolleyError::SessionDead(error.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(TrolleyError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|error| {
        if error.is_timeout() {
            TrolleyError::Timeout {
                url: url.to_string(),
            }
        } else {
            TrolleyError::SessionDead(error.to_string())
        }
    })?;

    if let Some(marker) = detect_error_page(&body) {
        return Err(TrolleyError::ErrorPage {
            url: url.to_string(),
            marker: marker.to_string(),
        });
    }

    Ok(Page {
        url: url.to_string(),
        body,
        status: status.as_u16(),
    })
}

/// Scans a page body for known error markers
///
/// Only the head of the document is scanned; error interstitials are small,
/// and product pages can legitimately mention phrases like "out of stock".
fn detect_error_page(body: &str) -> Option<&'static str> {
    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();
    ERROR_PAGE_MARKERS
        .iter()
        .find(|marker| head.contains(**marker))
        .copied()
}

fn error_kind(error: &TrolleyError) -> &'static str {
    match error {
        TrolleyError::Timeout { .. } => "timeout",
        TrolleyError::Connect { .. } => "connect",
        TrolleyError::Http { .. } => "http",
        TrolleyError::ErrorPage { .. } => "error_page",
        TrolleyError::SessionDead(_) => "session_dead",
        TrolleyError::RetriesExhausted { .. } => "retries_exhausted",
        TrolleyError::CircuitOpen { .. } => "circuit_open",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_session_config() -> SessionConfig {
        SessionConfig {
            human_delay_ms: (0, 0),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            backoff: 1.0,
            jitter: false,
        }
    }

    fn site(base_url: &str) -> SiteConfig {
        SiteConfig {
            base_url: base_url.to_string(),
            seed_categories: vec![],
            consent_path: None,
        }
    }

    async fn session_for(server: &MockServer) -> PageSession {
        PageSession::setup(
            &site(&server.uri()),
            &fast_session_config(),
            &RateLimitConfig {
                max_requests: 1000,
                window_secs: 1,
                capacity: 100,
            },
            &CircuitBreakerConfig::default(),
            &fast_retry(),
            0.9,
            None,
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_navigate_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dept/fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Fresh Food</html>"))
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        let page = session
            .navigate(&format!("{}/dept/fresh", server.uri()))
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert!(page.body.contains("Fresh Food"));
    }

    #[tokio::test]
    async fn test_navigate_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        let error = session
            .navigate(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(error, TrolleyError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_navigate_detects_error_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html>Access Denied</html>"),
            )
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        let error = session
            .navigate(&format!("{}/blocked", server.uri()))
            .await
            .unwrap_err();

        // Retried per policy, then wrapped as exhaustion
        match error {
            TrolleyError::RetriesExhausted { source, .. } => {
                assert!(matches!(*source, TrolleyError::ErrorPage { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_navigate_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        let page = session
            .navigate(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
    }

    #[tokio::test]
    async fn test_dead_session_rebuilds_client_then_fails_session() {
        let server = MockServer::start().await;
        // Declares gzip but serves garbage; the body read dies mid-transfer
        Mock::given(method("GET"))
            .and(path("/warped"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "gzip")
                    .set_body_bytes(b"not gzip".to_vec()),
            )
            .mount(&server)
            .await;

        let mut session = PageSession::setup(
            &site(&server.uri()),
            &SessionConfig {
                human_delay_ms: (0, 0),
                timeout_secs: 5,
                max_restarts: 1,
                ..Default::default()
            },
            &RateLimitConfig {
                max_requests: 1000,
                window_secs: 1,
                capacity: 100,
            },
            &CircuitBreakerConfig::default(),
            &fast_retry(),
            1.0,
            None,
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap();

        // First load: one fetch on the original client, one on the rebuilt
        let url = format!("{}/warped", server.uri());
        let error = session.navigate(&url).await.unwrap_err();
        assert!(matches!(error, TrolleyError::SessionDead(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        // Restart budget spent; the next dead fetch fails the session
        let error = session.navigate(&url).await.unwrap_err();
        assert!(matches!(error, TrolleyError::SessionFailed { restarts: 2 }));
    }

    #[test]
    fn test_detect_error_page_scans_head_only() {
        assert_eq!(
            detect_error_page("<html>Access Denied</html>"),
            Some("access denied")
        );
        assert_eq!(detect_error_page("<html>Bananas</html>"), None);

        // Marker buried deep in a large page is ignored
        let mut big = "x".repeat(10_000);
        big.push_str("access denied");
        assert_eq!(detect_error_page(&big), None);
    }
}
