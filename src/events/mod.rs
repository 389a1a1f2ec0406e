//! Structured crawl event sink
//!
//! Crawlers and the page session report progress through an injected sink
//! instead of logging directly, so callers can capture events in tests or
//! route them elsewhere. The default sink forwards to tracing.

use std::sync::Arc;
use std::time::Duration;

/// Outcome of one reported operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retry,
    Skipped,
    Failure,
}

/// One structured crawl event
#[derive(Debug, Clone)]
pub struct CrawlEvent {
    /// Stage name, e.g. "category", "product_list", "session"
    pub stage: &'static str,
    pub url: Option<String>,
    pub outcome: Outcome,
    pub duration: Option<Duration>,
    pub detail: Option<String>,
}

impl CrawlEvent {
    pub fn new(stage: &'static str, outcome: Outcome) -> Self {
        Self {
            stage,
            url: None,
            outcome,
            duration: None,
            detail: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sink for structured crawl events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CrawlEvent);
}

/// Default sink: forwards events to tracing at a level matching the outcome
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CrawlEvent) {
        let url = event.url.as_deref().unwrap_or("-");
        let detail = event.detail.as_deref().unwrap_or("");
        let ms = event.duration.map(|d| d.as_millis() as u64).unwrap_or(0);

        match event.outcome {
            Outcome::Success => {
                tracing::debug!(stage = event.stage, url, duration_ms = ms, "{}", detail)
            }
            Outcome::Retry | Outcome::Skipped => {
                tracing::warn!(stage = event.stage, url, duration_ms = ms, "{}", detail)
            }
            Outcome::Failure => {
                tracing::error!(stage = event.stage, url, duration_ms = ms, "{}", detail)
            }
        }
    }
}

/// Convenience constructor for the default sink
pub fn tracing_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}
