//! Shared crawl run-loop
//!
//! One [`CrawlRunner::run`] call drives one crawl session: creates and starts
//! the session row, builds the page session (optionally through a selected
//! proxy), dispatches the requested stages, and always tears down and stamps
//! the terminal status exactly once, whatever happened in between.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::crawler::{CategoryMapper, ProductDetail, ProductList};
use crate::events::EventSink;
use crate::proxy::{ProxyMaintenance, SelectedProxy, TieredProxyManager};
use crate::queue::{SharedStorage, StorageGuard};
use crate::session::PageSession;
use crate::state::{CrawlStatus, CrawlType};
use crate::storage::{Storage, StorageError};
use crate::{Result, TrolleyError};

/// Final accounting for one crawl session
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub session_id: i64,
    pub status: CrawlStatus,
    pub processed_items: u64,
    pub failed_items: u64,
}

/// Mutable per-run state shared with the stage implementations
pub(crate) struct StageContext {
    storage: SharedStorage,
    session_id: i64,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) processed: u64,
    pub(crate) failed: u64,
    maintenance: Option<ProxyMaintenance>,
}

impl StageContext {
    fn lock(&self) -> Result<StorageGuard<'_>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()).into())
    }

    /// True when the session has been externally stopped or cancelled
    pub(crate) fn should_stop(&self) -> Result<bool> {
        let status = self.lock()?.session_status(self.session_id)?;
        if status.is_stop_signal() {
            tracing::info!(session_id = self.session_id, %status, "stop signal honored");
            return Ok(true);
        }
        Ok(false)
    }

    /// Counts one failed item and appends it to the session error log
    pub(crate) fn record_failure(&mut self, message: &str) -> Result<()> {
        self.failed += 1;
        self.lock()?.append_session_error(self.session_id, message)?;
        Ok(())
    }

    /// Runs whatever proxy upkeep is due; called between batches
    pub(crate) async fn run_maintenance(&mut self) -> Result<()> {
        if let Some(maintenance) = self.maintenance.as_mut() {
            maintenance.run(Utc::now()).await?;
        }
        Ok(())
    }
}

/// Drives crawl sessions end to end
pub struct CrawlRunner {
    storage: SharedStorage,
    config: Config,
    events: Arc<dyn EventSink>,
}

impl CrawlRunner {
    pub fn new(storage: SharedStorage, config: Config, events: Arc<dyn EventSink>) -> Self {
        Self {
            storage,
            config,
            events,
        }
    }

    fn lock(&self) -> Result<StorageGuard<'_>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()).into())
    }

    /// Refuses to start while another session runs, unless forced
    ///
    /// Forcing cancels the stale session so its worker (if any survives)
    /// honors the stop signal at its next batch boundary.
    fn ensure_no_running_session(&self, force: bool) -> Result<()> {
        let mut storage = self.lock()?;
        let Some(running) = storage.get_running_session()? else {
            return Ok(());
        };
        if !force {
            return Err(TrolleyError::SessionActive {
                session_id: running.id,
            });
        }
        tracing::warn!(session_id = running.id, "cancelling stale running session");
        storage.signal_session(running.id, CrawlStatus::Cancelled)?;
        Ok(())
    }

    /// Runs one crawl session of the given type
    pub async fn run(&self, crawl_type: CrawlType, force: bool) -> Result<CrawlReport> {
        self.ensure_no_running_session(force)?;

        let session_id = {
            let mut storage = self.lock()?;
            let id = storage.create_session(crawl_type)?;
            storage.start_session(id)?;
            id
        };
        tracing::info!(session_id, crawl_type = %crawl_type, "crawl session started");

        let proxy = self.select_proxy()?;
        let proxy_url = proxy.as_ref().map(|p| p.connection_url.clone());

        let mut page = match PageSession::setup(
            &self.config.site,
            &self.config.session,
            &self.config.rate_limit,
            &self.config.circuit_breaker,
            &self.config.retry,
            self.config.crawler.error_threshold,
            proxy_url,
            Arc::clone(&self.events),
        )
        .await
        {
            Ok(page) => page,
            Err(error) => {
                let mut storage = self.lock()?;
                storage.append_session_error(session_id, &error.to_string())?;
                storage.finish_session(session_id, CrawlStatus::Failed, 0, 0, None)?;
                return Err(error);
            }
        };

        let mut ctx = StageContext {
            storage: Arc::clone(&self.storage),
            session_id,
            events: Arc::clone(&self.events),
            processed: 0,
            failed: 0,
            maintenance: self.config.proxy.enabled.then(|| {
                ProxyMaintenance::new(Arc::clone(&self.storage), self.config.proxy.clone())
            }),
        };

        let result = self.run_stages(crawl_type, &mut page, &mut ctx).await;

        if let Some(selected) = &proxy {
            self.report_proxy_outcome(selected, page.is_healthy());
        }
        let metadata = page.health_snapshot().to_string();
        page.teardown();

        let status = match &result {
            Ok(()) => CrawlStatus::Completed,
            Err(error) => {
                let mut storage = self.lock()?;
                storage.append_session_error(session_id, &error.to_string())?;
                CrawlStatus::Failed
            }
        };
        self.lock()?.finish_session(
            session_id,
            status,
            ctx.processed,
            ctx.failed,
            Some(&metadata),
        )?;

        let record = self.lock()?.get_session(session_id)?;
        tracing::info!(
            session_id,
            status = %record.status,
            processed = record.processed_items,
            failed = record.failed_items,
            "crawl session finished"
        );

        result?;
        Ok(CrawlReport {
            session_id,
            status: record.status,
            processed_items: record.processed_items,
            failed_items: record.failed_items,
        })
    }

    async fn run_stages(
        &self,
        crawl_type: CrawlType,
        page: &mut PageSession,
        ctx: &mut StageContext,
    ) -> Result<()> {
        match crawl_type {
            CrawlType::Category => self.category_stage().run(page, ctx).await,
            CrawlType::ProductList => self.list_stage().run(page, ctx).await,
            CrawlType::ProductDetail => self.detail_stage().run(page, ctx).await,
            CrawlType::Both => {
                self.category_stage().run(page, ctx).await?;
                if ctx.should_stop()? {
                    return Ok(());
                }
                self.list_stage().run(page, ctx).await?;
                if ctx.should_stop()? {
                    return Ok(());
                }
                self.detail_stage().run(page, ctx).await
            }
        }
    }

    fn category_stage(&self) -> CategoryMapper {
        CategoryMapper::new(
            Arc::clone(&self.storage),
            self.config.site.clone(),
            self.config.crawler.clone(),
        )
    }

    fn list_stage(&self) -> ProductList {
        ProductList::new(Arc::clone(&self.storage), self.config.crawler.clone())
    }

    fn detail_stage(&self) -> ProductDetail {
        ProductDetail::new(Arc::clone(&self.storage), self.config.crawler.clone())
    }

    fn select_proxy(&self) -> Result<Option<SelectedProxy>> {
        if !self.config.proxy.enabled {
            return Ok(None);
        }
        let manager =
            TieredProxyManager::new(Arc::clone(&self.storage), self.config.proxy.clone());
        manager.get_proxy()
    }

    /// Coarse per-session proxy feedback; per-request accounting belongs to
    /// the proxy test command
    fn report_proxy_outcome(&self, selected: &SelectedProxy, healthy: bool) {
        let manager =
            TieredProxyManager::new(Arc::clone(&self.storage), self.config.proxy.clone());
        if let Err(error) = manager.record_result(selected.id, healthy, 0.0, 0) {
            tracing::warn!(proxy_id = selected.id, %error, "proxy result not recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::events::Outcome;
    use crate::queue::CrawlQueue;
    use crate::state::QueueType;
    use crate::storage::{NewProduct, SqliteStorage};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Config {
        toml::from_str(
            r#"
[site]
base-url = "https://groceries.example.com"

[crawler]
max-attempts = 3
batch-size = 10

[output]
database-path = "./trolley.db"
"#,
        )
        .unwrap()
    }

    fn runner() -> CrawlRunner {
        let storage: SharedStorage =
            Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        CrawlRunner::new(storage, test_config(), crate::events::tracing_sink())
    }

    #[test]
    fn test_running_session_guard() {
        let runner = runner();
        let running_id = {
            let mut storage = runner.storage.lock().unwrap();
            let id = storage.create_session(CrawlType::Category).unwrap();
            storage.start_session(id).unwrap();
            id
        };

        let refused = runner.ensure_no_running_session(false);
        assert!(matches!(
            refused,
            Err(TrolleyError::SessionActive { session_id }) if session_id == running_id
        ));

        runner.ensure_no_running_session(true).unwrap();
        let status = runner
            .storage
            .lock()
            .unwrap()
            .session_status(running_id)
            .unwrap();
        assert_eq!(status, CrawlStatus::Cancelled);
    }

    fn fast_config(base_url: &str) -> Config {
        toml::from_str(&format!(
            r#"
[site]
base-url = "{base_url}"

[crawler]
max-attempts = 2
batch-size = 10
detail-batch-size = 10
inter-batch-delay-ms = 1
error-threshold = 1.0

[retry]
max-attempts = 2
initial-delay-ms = 1
backoff = 1.0
jitter = false

[session]
human-delay-ms = [0, 0]

[output]
database-path = "./trolley.db"
"#
        ))
        .unwrap()
    }

    fn stage_outcomes(sink: &RecordingSink, stage: &str) -> Vec<Outcome> {
        sink.events()
            .into_iter()
            .filter(|event| event.stage == stage)
            .map(|event| event.outcome)
            .collect()
    }

    #[tokio::test]
    async fn test_unavailable_product_reports_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/gone/1000000000555"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><div data-testid="product-unavailable-message">Sorry</div></body></html>"#,
            ))
            .mount(&server)
            .await;

        let storage: SharedStorage =
            Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let url = format!("{}/product/gone/1000000000555", server.uri());
        let product_id = storage
            .lock()
            .unwrap()
            .upsert_product(&NewProduct {
                site_id: "1000000000555",
                name: "Gone",
                brand: None,
                price: None,
                url: &url,
                image_url: None,
                category_id: None,
            })
            .unwrap();
        CrawlQueue::new(Arc::clone(&storage), QueueType::ProductDetail)
            .push(&url, 0, 2, None, Some(product_id))
            .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let runner = CrawlRunner::new(
            Arc::clone(&storage),
            fast_config(&server.uri()),
            sink.clone(),
        );
        runner.run(CrawlType::ProductDetail, false).await.unwrap();

        assert_eq!(stage_outcomes(&sink, "product_detail"), vec![Outcome::Skipped]);
    }

    #[tokio::test]
    async fn test_requeued_item_reports_retry_then_failure() {
        let storage: SharedStorage =
            Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        // No product reference, so every attempt fails without a fetch
        CrawlQueue::new(Arc::clone(&storage), QueueType::ProductDetail)
            .push(
                "https://groceries.example.com/product/x/1000000000777",
                0,
                2,
                None,
                None,
            )
            .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let runner = CrawlRunner::new(
            Arc::clone(&storage),
            fast_config("https://groceries.example.com"),
            sink.clone(),
        );
        runner.run(CrawlType::ProductDetail, false).await.unwrap();

        assert_eq!(
            stage_outcomes(&sink, "product_detail"),
            vec![Outcome::Retry, Outcome::Failure]
        );
    }

    #[test]
    fn test_guard_ignores_finished_sessions() {
        let runner = runner();
        {
            let mut storage = runner.storage.lock().unwrap();
            let id = storage.create_session(CrawlType::Category).unwrap();
            storage.start_session(id).unwrap();
            storage
                .finish_session(id, CrawlStatus::Completed, 1, 0, None)
                .unwrap();
        }
        runner.ensure_no_running_session(false).unwrap();
    }
}
