//! Product listing stage
//!
//! Works through the product-list queue: each claimed item is a category page
//! that gets paginated for product tiles. Discovered subcategories are
//! recorded one level down and queued behind the seeds; each valid tile
//! becomes a product row and, unless its nutrition is already scraped, a
//! product-detail queue entry.

use scraper::Html;
use url::Url;

use crate::config::CrawlerConfig;
use crate::crawler::runner::StageContext;
use crate::events::{CrawlEvent, Outcome};
use crate::extract::{category_links, is_category_url, product_tiles, with_page, CategoryLink, ProductTile};
use crate::queue::{CrawlQueue, SharedStorage, StorageGuard};
use crate::session::PageSession;
use crate::state::{QueueStatus, QueueType};
use crate::storage::{CategoryRecord, NewProduct, QueueItemRecord, Storage, StorageError};
use crate::Result;

const STAGE: &str = "product_list";

/// Subcategories jump ahead of unscored work but stay behind keyword-scored
/// seeds
const SUBCATEGORY_PRIORITY: i64 = 3;

pub struct ProductList {
    storage: SharedStorage,
    crawler: CrawlerConfig,
    queue: CrawlQueue,
    detail_queue: CrawlQueue,
}

impl ProductList {
    pub fn new(storage: SharedStorage, crawler: CrawlerConfig) -> Self {
        let queue = CrawlQueue::new(storage.clone(), QueueType::ProductList);
        let detail_queue = CrawlQueue::new(storage.clone(), QueueType::ProductDetail);
        Self {
            storage,
            crawler,
            queue,
            detail_queue,
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
            let batch = self.queue.claim(self.crawler.batch_size)?;
            if batch.is_empty() {
                break;
            }
            tracing::info!(count = batch.len(), "listing batch claimed");

            for item in batch {
                match self.process_item(page, &item).await {
                    Ok(products) => {
                        self.queue.complete(item.id)?;
                        ctx.processed += 1;
                        ctx.events.emit(
                            CrawlEvent::new(STAGE, Outcome::Success)
                                .with_url(&item.url)
                                .with_detail(format!("{products} products")),
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
                        ctx.record_failure(&format!("listing {}: {error}", item.url))?;
                    }
                }
            }
            ctx.run_maintenance().await?;
        }
        Ok(())
    }

    /// Paginates one category page, returning how many products it yielded
    async fn process_item(
        &self,
        page: &mut PageSession,
        item: &QueueItemRecord,
    ) -> Result<usize> {
        let category = match item.category_id {
            Some(id) => Some(self.lock()?.get_category(id)?),
            None => None,
        };
        let base = Url::parse(&item.url)?;

        let mut total_products = 0;
        let mut page_no = 1;
        loop {
            let page_url = with_page(&base, page_no);
            let fetched = page.navigate(page_url.as_str()).await?;

            let (tiles, subcategories) = {
                let document = Html::parse_document(&fetched.body);
                let tiles = product_tiles(&document, &base);
                let subcategories = if page_no == 1 {
                    category_links(&document, &base)
                } else {
                    Vec::new()
                };
                (tiles, subcategories)
            };

            if page_no == 1 {
                self.enqueue_subcategories(&item.url, category.as_ref(), &subcategories)?;
            }

            if tiles.is_empty() {
                if page_no == 1 {
                    // Hub page or genuinely empty category; a completed leaf
                    // either way
                    tracing::debug!(
                        url = %item.url,
                        subcategories = subcategories.len(),
                        "no products on first page"
                    );
                }
                break;
            }

            total_products += self.store_tiles(&tiles, item.category_id)?;

            page_no += 1;
            if page_no > self.crawler.max_pages_per_category {
                tracing::warn!(url = %item.url, "pagination cap reached");
                break;
            }
        }
        Ok(total_products)
    }

    /// Records discovered subcategories one level down and queues them
    fn enqueue_subcategories(
        &self,
        item_url: &str,
        category: Option<&CategoryRecord>,
        links: &[CategoryLink],
    ) -> Result<()> {
        for link in links {
            if link.url == item_url || !is_category_url(&link.url) {
                continue;
            }
            let child_id = match category {
                Some(parent) => {
                    let mut storage = self.lock()?;
                    match storage.upsert_category(
                        &link.name,
                        &link.url,
                        parent.level + 1,
                        Some(parent.id),
                    ) {
                        Ok(id) => Some(id),
                        Err(error) => {
                            tracing::debug!(url = %link.url, %error, "subcategory skipped");
                            continue;
                        }
                    }
                }
                None => None,
            };
            self.queue.push(
                &link.url,
                SUBCATEGORY_PRIORITY,
                self.crawler.max_attempts,
                child_id,
                None,
            )?;
        }
        Ok(())
    }

    /// Upserts tiles as products and queues detail work for the unscraped
    fn store_tiles(&self, tiles: &[ProductTile], category_id: Option<i64>) -> Result<usize> {
        let mut stored = 0;
        for tile in tiles {
            let (product_id, nutrition_scraped) = {
                let mut storage = self.lock()?;
                let product_id = storage.upsert_product(&NewProduct {
                    site_id: &tile.site_id,
                    name: &tile.name,
                    brand: None,
                    price: tile.price,
                    url: &tile.url,
                    image_url: tile.image_url.as_deref(),
                    category_id,
                })?;
                let record = storage.get_product(product_id)?;
                (product_id, record.nutrition_scraped)
            };

            if !nutrition_scraped {
                self.detail_queue.push(
                    &tile.url,
                    0,
                    self.crawler.max_attempts,
                    category_id,
                    Some(product_id),
                )?;
            }
            stored += 1;
        }

        if let Some(category_id) = category_id {
            self.lock()?.add_category_products(category_id, stored as u32)?;
        }
        Ok(stored)
    }
}
