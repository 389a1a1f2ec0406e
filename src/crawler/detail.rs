//! Product detail stage
//!
//! Works through the product-detail queue in small batches with a breather
//! between them. Each product page is checked for an unavailability marker
//! first; available products get their free-text details and nutrition table
//! extracted and persisted.

use std::time::Duration;

use scraper::Html;

use crate::config::CrawlerConfig;
use crate::crawler::runner::StageContext;
use crate::events::{CrawlEvent, Outcome};
use crate::extract::{
    extract_nutrition, extract_product_details, is_unavailable, NutritionFacts, ProductDetails,
};
use crate::queue::{CrawlQueue, SharedStorage, StorageGuard};
use crate::session::PageSession;
use crate::state::{QueueStatus, QueueType};
use crate::storage::{QueueItemRecord, Storage, StorageError};
use crate::{Result, TrolleyError};

const STAGE: &str = "product_detail";

/// What one product page yielded
enum PageData {
    Unavailable,
    Extracted {
        details: ProductDetails,
        nutrition: Option<NutritionFacts>,
    },
}

pub struct ProductDetail {
    storage: SharedStorage,
    crawler: CrawlerConfig,
    queue: CrawlQueue,
}

impl ProductDetail {
    pub fn new(storage: SharedStorage, crawler: CrawlerConfig) -> Self {
        let queue = CrawlQueue::new(storage.clone(), QueueType::ProductDetail);
        Self {
            storage,
            crawler,
            queue,
        }
    }

    fn lock(&self) -> Result<StorageGuard<'_>> {
        self.storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()).into())
    }

    pub(crate) async fn run(
        &self,
        page: &mut PageSession,
        ctx: &mut StageContext,
    ) -> Result<()> {
        loop {
            self.queue.reap_stale(self.crawler.lease_timeout_secs)?;
            if ctx.should_stop()? {
                break;
            }
            let batch = self.queue.claim(self.crawler.detail_batch_size)?;
            if batch.is_empty() {
                break;
            }
            tracing::info!(count = batch.len(), "detail batch claimed");

            for item in batch {
                match self.process_item(page, &item).await {
                    Ok((outcome, detail)) => {
                        self.queue.complete(item.id)?;
                        ctx.processed += 1;
                        ctx.events.emit(
                            CrawlEvent::new(STAGE, outcome)
                                .with_url(&item.url)
                                .with_detail(detail),
                        );
                    }
                    Err(error) if error.is_session_fatal() => return Err(error),
                    Err(error) => {
                        let status = self.queue.fail(item.id, &error.to_string())?;
                        let outcome = if status == QueueStatus::Pending {
                            Outcome::Retry
                        } else {
                            Outcome::Failure
                        };
                        ctx.events.emit(
                            CrawlEvent::new(STAGE, outcome)
                                .with_url(&item.url)
                                .with_detail(format!("{error} ({status})")),
                        );
                        ctx.record_failure(&format!("detail {}: {error}", item.url))?;
                    }
                }
            }

            ctx.run_maintenance().await?;
            tokio::time::sleep(Duration::from_millis(self.crawler.inter_batch_delay_ms)).await;
        }
        Ok(())
    }

    /// Scrapes one product page, reporting how it went and a short detail
    async fn process_item(
        &self,
        page: &mut PageSession,
        item: &QueueItemRecord,
    ) -> Result<(Outcome, String)> {
        let product_id = item.product_id.ok_or_else(|| {
            TrolleyError::Storage(StorageError::ProductNotFound(format!(
                "queue item {} has no product reference",
                item.id
            )))
        })?;

        let fetched = page.navigate(&item.url).await?;
        let data = {
            let document = Html::parse_document(&fetched.body);
            if is_unavailable(&document) {
                PageData::Unavailable
            } else {
                PageData::Extracted {
                    details: extract_product_details(&document),
                    nutrition: extract_nutrition(&document).filter(|facts| !facts.is_empty()),
                }
            }
        };

        match data {
            PageData::Unavailable => {
                self.lock()?.set_product_availability(product_id, false)?;
                Ok((Outcome::Skipped, "unavailable".to_string()))
            }
            PageData::Extracted { details, nutrition } => {
                let mut storage = self.lock()?;
                storage.set_product_availability(product_id, true)?;
                storage.set_product_details(
                    product_id,
                    details.description.as_deref(),
                    details.ingredients.as_deref(),
                    details.storage.as_deref(),
                )?;
                match nutrition {
                    Some(facts) => {
                        storage.save_nutrition(&facts.into_record(product_id))?;
                        Ok((Outcome::Success, "nutrition saved".to_string()))
                    }
                    // Non-food products have no table; completed, not failed,
                    // and the product stays eligible for a future re-check
                    None => Ok((Outcome::Success, "no nutrition table".to_string())),
                }
            }
        }
    }
}
