//! Category discovery stage
//!
//! Maps the site's department taxonomy: visits each seed category (from
//! config, or discovered from the site root when no seeds are configured),
//! records it as a level-0 category, records its child links one level down,
//! and enqueues the seed into the product-list queue at a keyword-scored
//! priority.

use scraper::Html;
use url::Url;

use crate::config::{CrawlerConfig, SiteConfig};
use crate::crawler::runner::StageContext;
use crate::events::{CrawlEvent, Outcome};
use crate::extract::{
    category_links, category_priority, extract_category_name, is_category_url, name_from_slug,
};
use crate::queue::{CrawlQueue, SharedStorage, StorageGuard};
use crate::session::PageSession;
use crate::state::QueueType;
use crate::storage::{Storage, StorageError};
use crate::Result;

const STAGE: &str = "category";

pub struct CategoryMapper {
    storage: SharedStorage,
    site: SiteConfig,
    crawler: CrawlerConfig,
    list_queue: CrawlQueue,
}

impl CategoryMapper {
    pub fn new(storage: SharedStorage, site: SiteConfig, crawler: CrawlerConfig) -> Self {
        let list_queue = CrawlQueue::new(storage.clone(), QueueType::ProductList);
        Self {
            storage,
            site,
            crawler,
            list_queue,
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
        let seeds = self.seed_urls(page).await?;
        tracing::info!(count = seeds.len(), "mapping seed categories");

        for seed in seeds {
            if ctx.should_stop()? {
                break;
            }
            match self.map_seed(page, &seed).await {
                Ok(children) => {
                    ctx.processed += 1;
                    ctx.events.emit(
                        CrawlEvent::new(STAGE, Outcome::Success)
                            .with_url(&seed)
                            .with_detail(format!("{children} child links")),
                    );
                }
                Err(error) if error.is_session_fatal() => return Err(error),
                Err(error) => {
                    ctx.events.emit(
                        CrawlEvent::new(STAGE, Outcome::Failure)
                            .with_url(&seed)
                            .with_detail(error.to_string()),
                    );
                    ctx.record_failure(&format!("category {seed}: {error}"))?;
                }
            }
            ctx.run_maintenance().await?;
        }
        Ok(())
    }

    /// Configured seeds, or links discovered from the site root
    async fn seed_urls(&self, page: &mut PageSession) -> Result<Vec<String>> {
        if !self.site.seed_categories.is_empty() {
            let base = Url::parse(&self.site.base_url)?;
            return Ok(self
                .site
                .seed_categories
                .iter()
                .filter_map(|seed| base.join(seed).ok())
                .map(|url| url.to_string())
                .collect());
        }

        let root = page.navigate(&self.site.base_url).await?;
        let base = Url::parse(&self.site.base_url)?;
        let discovered: Vec<String> = {
            let document = Html::parse_document(&root.body);
            category_links(&document, &base)
                .into_iter()
                .map(|link| link.url)
                .filter(|url| is_category_url(url))
                .collect()
        };
        tracing::info!(count = discovered.len(), "categories discovered from root");
        Ok(discovered)
    }

    /// Maps one seed: upsert level 0, upsert children at level 1, enqueue
    async fn map_seed(&self, page: &mut PageSession, seed: &str) -> Result<usize> {
        let fetched = page.navigate(seed).await?;
        let base = Url::parse(seed)?;

        let (name, children) = {
            let document = Html::parse_document(&fetched.body);
            let name = extract_category_name(&document)
                .unwrap_or_else(|| name_from_slug(seed));
            let children: Vec<_> = category_links(&document, &base)
                .into_iter()
                .filter(|link| link.url != seed && is_category_url(&link.url))
                .collect();
            (name, children)
        };

        let category_id = {
            let mut storage = self.lock()?;
            let category_id = storage.upsert_category(&name, seed, 0, None)?;
            for child in &children {
                // A child already known at another level keeps its place
                if let Err(error) =
                    storage.upsert_category(&child.name, &child.url, 1, Some(category_id))
                {
                    tracing::debug!(url = %child.url, %error, "child category skipped");
                }
            }
            category_id
        };

        let priority = category_priority(0, &name);
        self.list_queue.push(
            seed,
            priority,
            self.crawler.max_attempts,
            Some(category_id),
            None,
        )?;
        tracing::debug!(category = %name, priority, "seed category mapped");
        Ok(children.len())
    }
}
