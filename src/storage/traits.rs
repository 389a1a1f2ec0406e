//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{CrawlStatus, CrawlType, ProxyStatus, ProxyTier, QueueStatus, QueueType};
use crate::storage::{
    CategoryRecord, NutritionRecord, ProductRecord, ProviderCosts, ProxyRecord, ProxySettings,
    QueueItemRecord, SessionRecord,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Queue item not found: {0}")]
    ItemNotFound(i64),

    #[error("Category not found: {0}")]
    CategoryNotFound(i64),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Category hierarchy violation: {0}")]
    HierarchyViolation(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Fields for creating or refreshing a queue row
#[derive(Debug, Clone)]
pub struct NewQueueItem<'a> {
    pub url: &'a str,
    pub queue_type: QueueType,
    pub priority: i64,
    pub max_attempts: u32,
    pub category_id: Option<i64>,
    pub product_id: Option<i64>,
    pub metadata: Option<&'a str>,
}

/// Fields for creating or refreshing a product row
#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub site_id: &'a str,
    pub name: &'a str,
    pub brand: Option<&'a str>,
    pub price: Option<f64>,
    pub url: &'a str,
    pub image_url: Option<&'a str>,
    pub category_id: Option<i64>,
}

/// Fields for importing a proxy endpoint
#[derive(Debug, Clone)]
pub struct NewProxy<'a> {
    pub address: &'a str,
    pub port: u16,
    pub tier: ProxyTier,
    pub provider: &'a str,
    pub status: ProxyStatus,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub cost_per_request: f64,
    pub daily_request_limit: Option<u32>,
    pub bandwidth_limit_mb: Option<f64>,
    pub country: Option<&'a str>,
    pub expires_at: Option<&'a str>,
}

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the crawlers, the
/// work queue and the proxy manager.
pub trait Storage {
    // ===== Session Management =====

    /// Creates a new pending crawl session, returning its ID
    fn create_session(&mut self, crawl_type: CrawlType) -> StorageResult<i64>;

    /// Gets a session by ID
    fn get_session(&self, session_id: i64) -> StorageResult<SessionRecord>;

    /// Gets the most recent session, if any
    fn get_latest_session(&self) -> StorageResult<Option<SessionRecord>>;

    /// Gets the currently running session, if any
    fn get_running_session(&self) -> StorageResult<Option<SessionRecord>>;

    /// Marks a pending session running and stamps started_at
    fn start_session(&mut self, session_id: i64) -> StorageResult<()>;

    /// Stamps a terminal status exactly once
    ///
    /// The update only applies while the persisted status is still pending or
    /// running, so a late writer can never overwrite the terminal state.
    fn finish_session(
        &mut self,
        session_id: i64,
        status: CrawlStatus,
        processed_items: u64,
        failed_items: u64,
        metadata: Option<&str>,
    ) -> StorageResult<()>;

    /// Sets a stop-signal status (stopped/cancelled) on a live session
    fn signal_session(&mut self, session_id: i64, status: CrawlStatus) -> StorageResult<()>;

    /// Appends a timestamped line to the session error log, keeping only a
    /// bounded trailing window
    fn append_session_error(&mut self, session_id: i64, message: &str) -> StorageResult<()>;

    /// Reads just the current status of a session
    fn session_status(&self, session_id: i64) -> StorageResult<CrawlStatus>;

    // ===== Work Queue =====

    /// Idempotent enqueue: get-or-create on (url_hash, queue_type)
    ///
    /// Returns the row ID and whether a new row was created.
    fn enqueue_item(&mut self, item: &NewQueueItem<'_>) -> StorageResult<(i64, bool)>;

    /// Claims up to `limit` pending items of one queue type
    ///
    /// Items come back in (priority DESC, created_at ASC) order and are moved
    /// to processing with their lease stamped in the same transaction.
    fn claim_batch(&mut self, queue_type: QueueType, limit: u32)
        -> StorageResult<Vec<QueueItemRecord>>;

    /// Marks a processing item completed
    fn complete_item(&mut self, item_id: i64) -> StorageResult<()>;

    /// Records a failure: attempts + 1, then pending again or terminally failed
    ///
    /// Returns the resulting status.
    fn fail_item(&mut self, item_id: i64, error: &str) -> StorageResult<QueueStatus>;

    /// Requeues processing items whose lease is older than the timeout
    ///
    /// Returns how many items were reaped. Reaped items get an attempt charged
    /// so a crash-looping URL still reaches the terminal failed state.
    fn reap_stale_items(&mut self, lease_timeout_secs: u64) -> StorageResult<u64>;

    /// Gets one queue item by ID
    fn get_queue_item(&self, item_id: i64) -> StorageResult<QueueItemRecord>;

    /// Counts items of one type and status
    fn count_queue_items(&self, queue_type: QueueType, status: QueueStatus)
        -> StorageResult<u64>;

    // ===== Categories =====

    /// Get-or-create a category by URL, validating the hierarchy
    ///
    /// A new child must sit exactly one level below its parent, and linking
    /// may never create a cycle.
    fn upsert_category(
        &mut self,
        name: &str,
        url: &str,
        level: u32,
        parent_id: Option<i64>,
    ) -> StorageResult<i64>;

    /// Gets a category by ID
    fn get_category(&self, category_id: i64) -> StorageResult<CategoryRecord>;

    /// Gets a category by URL
    fn get_category_by_url(&self, url: &str) -> StorageResult<Option<CategoryRecord>>;

    /// Adds to a category's product counter
    fn add_category_products(&mut self, category_id: i64, delta: u32) -> StorageResult<()>;

    /// Lists all categories ordered by (level, name)
    fn list_categories(&self) -> StorageResult<Vec<CategoryRecord>>;

    // ===== Products =====

    /// Creates or refreshes a product keyed on its site product ID
    fn upsert_product(&mut self, product: &NewProduct<'_>) -> StorageResult<i64>;

    /// Gets a product by row ID
    fn get_product(&self, product_id: i64) -> StorageResult<ProductRecord>;

    /// Gets a product by site product ID
    fn get_product_by_site_id(&self, site_id: &str) -> StorageResult<Option<ProductRecord>>;

    /// Flips product availability
    fn set_product_availability(&mut self, product_id: i64, available: bool) -> StorageResult<()>;

    /// Stores the free-text detail fields scraped from the product page
    fn set_product_details(
        &mut self,
        product_id: i64,
        description: Option<&str>,
        ingredients: Option<&str>,
        storage: Option<&str>,
    ) -> StorageResult<()>;

    /// Writes the 1:1 nutrition row and marks the product scraped
    fn save_nutrition(&mut self, nutrition: &NutritionRecord) -> StorageResult<()>;

    /// Gets the nutrition row for a product, if scraped
    fn get_nutrition(&self, product_id: i64) -> StorageResult<Option<NutritionRecord>>;

    /// Counts all products
    fn count_products(&self) -> StorageResult<u64>;

    // ===== Proxies =====

    /// Creates or refreshes a proxy keyed on (address, port, provider)
    fn upsert_proxy(&mut self, proxy: &NewProxy<'_>) -> StorageResult<i64>;

    /// Lists proxies, optionally filtered by tier
    fn list_proxies(&self, tier: Option<ProxyTier>) -> StorageResult<Vec<ProxyRecord>>;

    /// Active, under-limit candidates of one tier in selection order
    /// (success_rate DESC, response time ASC, total_requests ASC)
    fn candidate_proxies(
        &self,
        tier: ProxyTier,
        min_success_rate: f64,
        limit: u32,
    ) -> StorageResult<Vec<ProxyRecord>>;

    /// Bumps usage counters and last_used for a selected proxy
    fn record_proxy_selection(&mut self, proxy_id: i64) -> StorageResult<()>;

    /// Writes back mutated health/cost fields after a request outcome
    fn update_proxy_stats(&mut self, record: &ProxyRecord) -> StorageResult<()>;

    /// Sets a proxy's status
    fn set_proxy_status(&mut self, proxy_id: i64, status: ProxyStatus) -> StorageResult<()>;

    /// Zeroes all daily request counters
    fn reset_daily_counters(&mut self) -> StorageResult<u64>;

    /// Deletes proxies whose expires_at has passed, returning the count
    fn purge_expired_proxies(&mut self) -> StorageResult<u64>;

    /// Per-provider usage and cost aggregates
    fn provider_costs(&self) -> StorageResult<Vec<ProviderCosts>>;

    /// Loads the stored selection settings, or defaults if never saved
    fn get_proxy_settings(&self) -> StorageResult<ProxySettings>;

    /// Persists the selection settings
    fn save_proxy_settings(&mut self, settings: &ProxySettings) -> StorageResult<()>;
}
