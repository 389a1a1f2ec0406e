//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{CrawlStatus, CrawlType, ProxyStatus, ProxyTier, QueueStatus, QueueType};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    NewProduct, NewProxy, NewQueueItem, Storage, StorageError, StorageResult,
};
use crate::storage::{
    CategoryRecord, NutritionRecord, ProductRecord, ProviderCosts, ProxyRecord, ProxySettings,
    QueueItemRecord, SessionRecord,
};
use crate::TrolleyError;
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Trailing window of the session error log retained in the database
const ERROR_LOG_WINDOW: usize = 10_000;

/// Upper bound on parent-chain walks when validating the category tree
const MAX_HIERARCHY_DEPTH: usize = 64;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    pub fn new(path: &Path) -> Result<Self, TrolleyError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        // Initialize schema
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> Result<Self, TrolleyError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
        Ok(SessionRecord {
            id: row.get(0)?,
            crawl_type: CrawlType::from_db_string(&row.get::<_, String>(1)?)
                .unwrap_or(CrawlType::Both),
            status: CrawlStatus::from_db_string(&row.get::<_, String>(2)?)
                .unwrap_or(CrawlStatus::Failed),
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            processed_items: row.get::<_, i64>(5)? as u64,
            failed_items: row.get::<_, i64>(6)? as u64,
            error_log: row.get(7)?,
            metadata: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn row_to_queue_item(row: &Row<'_>) -> rusqlite::Result<QueueItemRecord> {
        Ok(QueueItemRecord {
            id: row.get(0)?,
            url: row.get(1)?,
            url_hash: row.get(2)?,
            queue_type: QueueType::from_db_string(&row.get::<_, String>(3)?)
                .unwrap_or(QueueType::Category),
            status: QueueStatus::from_db_string(&row.get::<_, String>(4)?)
                .unwrap_or(QueueStatus::Failed),
            priority: row.get(5)?,
            attempts: row.get::<_, i64>(6)? as u32,
            max_attempts: row.get::<_, i64>(7)? as u32,
            error_message: row.get(8)?,
            category_id: row.get(9)?,
            product_id: row.get(10)?,
            metadata: row.get(11)?,
            created_at: row.get(12)?,
            processed_at: row.get(13)?,
            leased_at: row.get(14)?,
        })
    }

    fn row_to_category(row: &Row<'_>) -> rusqlite::Result<CategoryRecord> {
        Ok(CategoryRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            level: row.get::<_, i64>(3)? as u32,
            parent_id: row.get(4)?,
            is_active: row.get::<_, i64>(5)? != 0,
            product_count: row.get::<_, i64>(6)? as u32,
        })
    }

    fn row_to_product(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
        Ok(ProductRecord {
            id: row.get(0)?,
            site_id: row.get(1)?,
            name: row.get(2)?,
            brand: row.get(3)?,
            price: row.get(4)?,
            url: row.get(5)?,
            image_url: row.get(6)?,
            description: row.get(7)?,
            ingredients: row.get(8)?,
            storage: row.get(9)?,
            is_available: row.get::<_, i64>(10)? != 0,
            nutrition_scraped: row.get::<_, i64>(11)? != 0,
            category_id: row.get(12)?,
        })
    }

    fn row_to_proxy(row: &Row<'_>) -> rusqlite::Result<ProxyRecord> {
        Ok(ProxyRecord {
            id: row.get(0)?,
            address: row.get(1)?,
            port: row.get::<_, i64>(2)? as u16,
            tier: ProxyTier::from_db_string(&row.get::<_, String>(3)?).unwrap_or(ProxyTier::Free),
            provider: row.get(4)?,
            status: ProxyStatus::from_db_string(&row.get::<_, String>(5)?)
                .unwrap_or(ProxyStatus::Inactive),
            username: row.get(6)?,
            password: row.get(7)?,
            success_rate: row.get(8)?,
            average_response_ms: row.get(9)?,
            total_requests: row.get::<_, i64>(10)? as u64,
            failed_requests: row.get::<_, i64>(11)? as u64,
            consecutive_failures: row.get::<_, i64>(12)? as u32,
            bytes_used: row.get::<_, i64>(13)? as u64,
            cost_per_request: row.get(14)?,
            total_cost: row.get(15)?,
            daily_request_limit: row.get::<_, Option<i64>>(16)?.map(|v| v as u32),
            daily_requests: row.get::<_, i64>(17)? as u32,
            bandwidth_limit_mb: row.get(18)?,
            country: row.get(19)?,
            last_used: row.get(20)?,
            last_checked: row.get(21)?,
            expires_at: row.get(22)?,
        })
    }

    fn row_to_nutrition(row: &Row<'_>) -> rusqlite::Result<NutritionRecord> {
        Ok(NutritionRecord {
            product_id: row.get(0)?,
            energy_kj: row.get(1)?,
            energy_kcal: row.get(2)?,
            fat: row.get(3)?,
            saturated_fat: row.get(4)?,
            carbohydrates: row.get(5)?,
            sugars: row.get(6)?,
            fibre: row.get(7)?,
            protein: row.get(8)?,
            salt: row.get(9)?,
            serving_size: row.get(10)?,
            other_nutrients: row.get(11)?,
        })
    }

    /// Walks the parent chain and rejects cycles or runaway depth
    fn check_acyclic(&self, parent_id: i64) -> StorageResult<()> {
        let mut seen = vec![parent_id];
        let mut cursor = parent_id;

        for _ in 0..MAX_HIERARCHY_DEPTH {
            let next: Option<i64> = self
                .conn
                .query_row(
                    "SELECT parent_id FROM categories WHERE id = ?1",
                    params![cursor],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            match next {
                Some(id) if seen.contains(&id) => {
                    return Err(StorageError::HierarchyViolation(format!(
                        "cycle through category {}",
                        id
                    )));
                }
                Some(id) => {
                    seen.push(id);
                    cursor = id;
                }
                None => return Ok(()),
            }
        }

        Err(StorageError::HierarchyViolation(format!(
            "parent chain deeper than {} levels",
            MAX_HIERARCHY_DEPTH
        )))
    }
}

/// Keeps only the trailing `window` characters of a log string
fn trim_log(log: &str, window: usize) -> String {
    let total = log.chars().count();
    if total <= window {
        log.to_string()
    } else {
        log.chars().skip(total - window).collect()
    }
}

const SESSION_COLUMNS: &str = "id, crawl_type, status, started_at, completed_at, \
     processed_items, failed_items, error_log, metadata, created_at";

const QUEUE_COLUMNS: &str = "id, url, url_hash, queue_type, status, priority, attempts, \
     max_attempts, error_message, category_id, product_id, metadata, created_at, \
     processed_at, leased_at";

const PROXY_COLUMNS: &str = "id, address, port, tier, provider, status, username, password, \
     success_rate, average_response_ms, total_requests, failed_requests, consecutive_failures, \
     bytes_used, cost_per_request, total_cost, daily_request_limit, daily_requests, \
     bandwidth_limit_mb, country, last_used, last_checked, expires_at";

impl Storage for SqliteStorage {
    // ===== Session Management =====

    fn create_session(&mut self, crawl_type: CrawlType) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_sessions (crawl_type, status, created_at) VALUES (?1, ?2, ?3)",
            params![
                crawl_type.to_db_string(),
                CrawlStatus::Pending.to_db_string(),
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_session(&self, session_id: i64) -> StorageResult<SessionRecord> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions WHERE id = ?1",
            SESSION_COLUMNS
        ))?;

        stmt.query_row(params![session_id], Self::row_to_session)
            .map_err(|_| StorageError::SessionNotFound(session_id))
    }

    fn get_latest_session(&self) -> StorageResult<Option<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions ORDER BY id DESC LIMIT 1",
            SESSION_COLUMNS
        ))?;

        Ok(stmt.query_row([], Self::row_to_session).optional()?)
    }

    fn get_running_session(&self) -> StorageResult<Option<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions WHERE status = 'running' ORDER BY id DESC LIMIT 1",
            SESSION_COLUMNS
        ))?;

        Ok(stmt.query_row([], Self::row_to_session).optional()?)
    }

    fn start_session(&mut self, session_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE crawl_sessions SET status = 'running', started_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, session_id],
        )?;
        if changed == 0 {
            return Err(StorageError::ConstraintViolation(format!(
                "session {} is not pending",
                session_id
            )));
        }
        Ok(())
    }

    fn finish_session(
        &mut self,
        session_id: i64,
        status: CrawlStatus,
        processed_items: u64,
        failed_items: u64,
        metadata: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        // Guarded by the live statuses so the terminal stamp happens once
        self.conn.execute(
            "UPDATE crawl_sessions
             SET status = ?1, completed_at = ?2, processed_items = ?3,
                 failed_items = ?4, metadata = COALESCE(?5, metadata)
             WHERE id = ?6 AND status IN ('pending', 'running')",
            params![
                status.to_db_string(),
                now,
                processed_items as i64,
                failed_items as i64,
                metadata,
                session_id
            ],
        )?;
        Ok(())
    }

    fn signal_session(&mut self, session_id: i64, status: CrawlStatus) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1
             WHERE id = ?2 AND status IN ('pending', 'running')",
            params![status.to_db_string(), session_id],
        )?;
        Ok(())
    }

    fn append_session_error(&mut self, session_id: i64, message: &str) -> StorageResult<()> {
        let current: String = self
            .conn
            .query_row(
                "SELECT error_log FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|_| StorageError::SessionNotFound(session_id))?;

        let entry = format!("[{}] {}\n", Utc::now().to_rfc3339(), message);
        let combined = trim_log(&format!("{}{}", current, entry), ERROR_LOG_WINDOW);

        self.conn.execute(
            "UPDATE crawl_sessions SET error_log = ?1 WHERE id = ?2",
            params![combined, session_id],
        )?;
        Ok(())
    }

    fn session_status(&self, session_id: i64) -> StorageResult<CrawlStatus> {
        let status: String = self
            .conn
            .query_row(
                "SELECT status FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|_| StorageError::SessionNotFound(session_id))?;

        CrawlStatus::from_db_string(&status).ok_or_else(|| {
            StorageError::Database(format!("unknown session status '{}'", status))
        })
    }

    // ===== Work Queue =====

    fn enqueue_item(&mut self, item: &NewQueueItem<'_>) -> StorageResult<(i64, bool)> {
        let hash = crate::url_hash(item.url);

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM crawl_queue WHERE url_hash = ?1 AND queue_type = ?2",
                params![hash, item.queue_type.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok((id, false));
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_queue
             (url, url_hash, queue_type, status, priority, max_attempts,
              category_id, product_id, metadata, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.url,
                hash,
                item.queue_type.to_db_string(),
                item.priority,
                item.max_attempts as i64,
                item.category_id,
                item.product_id,
                item.metadata,
                now
            ],
        )?;

        Ok((self.conn.last_insert_rowid(), true))
    }

    fn claim_batch(
        &mut self,
        queue_type: QueueType,
        limit: u32,
    ) -> StorageResult<Vec<QueueItemRecord>> {
        let tx = self.conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let items = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM crawl_queue
                 WHERE queue_type = ?1 AND status = 'pending'
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT ?2",
                QUEUE_COLUMNS
            ))?;

            let items: Vec<QueueItemRecord> = stmt
                .query_map(
                    params![queue_type.to_db_string(), limit as i64],
                    Self::row_to_queue_item,
                )?
                .collect::<rusqlite::Result<_>>()?;
            items
        };

        for item in &items {
            tx.execute(
                "UPDATE crawl_queue SET status = 'processing', leased_at = ?1 WHERE id = ?2",
                params![now, item.id],
            )?;
        }

        tx.commit()?;

        Ok(items
            .into_iter()
            .map(|mut item| {
                item.status = QueueStatus::Processing;
                item.leased_at = Some(now.clone());
                item
            })
            .collect())
    }

    fn complete_item(&mut self, item_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE crawl_queue
             SET status = 'completed', processed_at = ?1, leased_at = NULL
             WHERE id = ?2",
            params![now, item_id],
        )?;
        Ok(())
    }

    fn fail_item(&mut self, item_id: i64, error: &str) -> StorageResult<QueueStatus> {
        let tx = self.conn.transaction()?;

        let (attempts, max_attempts): (i64, i64) = tx
            .query_row(
                "SELECT attempts, max_attempts FROM crawl_queue WHERE id = ?1",
                params![item_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StorageError::ItemNotFound(item_id))?;

        let attempts = attempts + 1;
        let status = if attempts >= max_attempts {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        };

        tx.execute(
            "UPDATE crawl_queue
             SET status = ?1, attempts = ?2, error_message = ?3, leased_at = NULL
             WHERE id = ?4",
            params![status.to_db_string(), attempts, error, item_id],
        )?;

        tx.commit()?;
        Ok(status)
    }

    fn reap_stale_items(&mut self, lease_timeout_secs: u64) -> StorageResult<u64> {
        let cutoff =
            (Utc::now() - ChronoDuration::seconds(lease_timeout_secs as i64)).to_rfc3339();
        let tx = self.conn.transaction()?;

        // Items already at their attempt budget go terminal
        let failed = tx.execute(
            "UPDATE crawl_queue
             SET status = 'failed', attempts = attempts + 1, leased_at = NULL,
                 error_message = 'lease expired'
             WHERE status = 'processing' AND leased_at < ?1
               AND attempts + 1 >= max_attempts",
            params![cutoff],
        )?;

        // The rest get another turn
        let requeued = tx.execute(
            "UPDATE crawl_queue
             SET status = 'pending', attempts = attempts + 1, leased_at = NULL,
                 error_message = 'lease expired'
             WHERE status = 'processing' AND leased_at < ?1",
            params![cutoff],
        )?;

        tx.commit()?;
        Ok((failed + requeued) as u64)
    }

    fn get_queue_item(&self, item_id: i64) -> StorageResult<QueueItemRecord> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_queue WHERE id = ?1",
            QUEUE_COLUMNS
        ))?;

        stmt.query_row(params![item_id], Self::row_to_queue_item)
            .map_err(|_| StorageError::ItemNotFound(item_id))
    }

    fn count_queue_items(
        &self,
        queue_type: QueueType,
        status: QueueStatus,
    ) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawl_queue WHERE queue_type = ?1 AND status = ?2",
            params![queue_type.to_db_string(), status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Categories =====

    fn upsert_category(
        &mut self,
        name: &str,
        url: &str,
        level: u32,
        parent_id: Option<i64>,
    ) -> StorageResult<i64> {
        if let Some(existing) = self.get_category_by_url(url)? {
            return Ok(existing.id);
        }

        if let Some(pid) = parent_id {
            let parent = self.get_category(pid)?;
            if level != parent.level + 1 {
                return Err(StorageError::HierarchyViolation(format!(
                    "child level {} under parent level {} (expected {})",
                    level,
                    parent.level,
                    parent.level + 1
                )));
            }
            self.check_acyclic(pid)?;
        } else if level != 0 {
            return Err(StorageError::HierarchyViolation(format!(
                "root category must be level 0, got {}",
                level
            )));
        }

        self.conn.execute(
            "INSERT INTO categories (name, url, level, parent_id) VALUES (?1, ?2, ?3, ?4)",
            params![name, url, level as i64, parent_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_category(&self, category_id: i64) -> StorageResult<CategoryRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, url, level, parent_id, is_active, product_count
             FROM categories WHERE id = ?1",
        )?;

        stmt.query_row(params![category_id], Self::row_to_category)
            .map_err(|_| StorageError::CategoryNotFound(category_id))
    }

    fn get_category_by_url(&self, url: &str) -> StorageResult<Option<CategoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, url, level, parent_id, is_active, product_count
             FROM categories WHERE url = ?1",
        )?;

        Ok(stmt
            .query_row(params![url], Self::row_to_category)
            .optional()?)
    }

    fn add_category_products(&mut self, category_id: i64, delta: u32) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE categories SET product_count = product_count + ?1 WHERE id = ?2",
            params![delta as i64, category_id],
        )?;
        Ok(())
    }

    fn list_categories(&self) -> StorageResult<Vec<CategoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, url, level, parent_id, is_active, product_count
             FROM categories ORDER BY level ASC, name ASC",
        )?;

        let categories = stmt
            .query_map([], Self::row_to_category)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(categories)
    }

    // ===== Products =====

    fn upsert_product(&mut self, product: &NewProduct<'_>) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM products WHERE site_id = ?1",
                params![product.site_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE products
                 SET name = ?1, brand = ?2, price = ?3, url = ?4, image_url = ?5,
                     category_id = COALESCE(?6, category_id), updated_at = ?7
                 WHERE id = ?8",
                params![
                    product.name,
                    product.brand,
                    product.price,
                    product.url,
                    product.image_url,
                    product.category_id,
                    now,
                    id
                ],
            )?;
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO products
             (site_id, name, brand, price, url, image_url, category_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                product.site_id,
                product.name,
                product.brand,
                product.price,
                product.url,
                product.image_url,
                product.category_id,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_product(&self, product_id: i64) -> StorageResult<ProductRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site_id, name, brand, price, url, image_url, description,
             ingredients, storage, is_available, nutrition_scraped, category_id
             FROM products WHERE id = ?1",
        )?;

        stmt.query_row(params![product_id], Self::row_to_product)
            .map_err(|_| StorageError::ProductNotFound(format!("id {}", product_id)))
    }

    fn get_product_by_site_id(&self, site_id: &str) -> StorageResult<Option<ProductRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site_id, name, brand, price, url, image_url, description,
             ingredients, storage, is_available, nutrition_scraped, category_id
             FROM products WHERE site_id = ?1",
        )?;

        Ok(stmt
            .query_row(params![site_id], Self::row_to_product)
            .optional()?)
    }

    fn set_product_availability(
        &mut self,
        product_id: i64,
        available: bool,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE products SET is_available = ?1, updated_at = ?2 WHERE id = ?3",
            params![available as i64, now, product_id],
        )?;
        Ok(())
    }

    fn set_product_details(
        &mut self,
        product_id: i64,
        description: Option<&str>,
        ingredients: Option<&str>,
        storage: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE products
             SET description = COALESCE(?1, description),
                 ingredients = COALESCE(?2, ingredients),
                 storage = COALESCE(?3, storage),
                 updated_at = ?4
             WHERE id = ?5",
            params![description, ingredients, storage, now, product_id],
        )?;
        Ok(())
    }

    fn save_nutrition(&mut self, nutrition: &NutritionRecord) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO nutrition_info
             (product_id, energy_kj, energy_kcal, fat, saturated_fat, carbohydrates,
              sugars, fibre, protein, salt, serving_size, other_nutrients, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                nutrition.product_id,
                nutrition.energy_kj,
                nutrition.energy_kcal,
                nutrition.fat,
                nutrition.saturated_fat,
                nutrition.carbohydrates,
                nutrition.sugars,
                nutrition.fibre,
                nutrition.protein,
                nutrition.salt,
                nutrition.serving_size,
                nutrition.other_nutrients,
                now
            ],
        )?;

        tx.execute(
            "UPDATE products SET nutrition_scraped = 1, updated_at = ?1 WHERE id = ?2",
            params![now, nutrition.product_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_nutrition(&self, product_id: i64) -> StorageResult<Option<NutritionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT product_id, energy_kj, energy_kcal, fat, saturated_fat, carbohydrates,
             sugars, fibre, protein, salt, serving_size, other_nutrients
             FROM nutrition_info WHERE product_id = ?1",
        )?;

        Ok(stmt
            .query_row(params![product_id], Self::row_to_nutrition)
            .optional()?)
    }

    fn count_products(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Proxies =====

    fn upsert_proxy(&mut self, proxy: &NewProxy<'_>) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM proxies WHERE address = ?1 AND port = ?2 AND provider = ?3",
                params![proxy.address, proxy.port as i64, proxy.provider],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE proxies
                 SET tier = ?1, status = ?2, username = ?3, password = ?4,
                     cost_per_request = ?5, daily_request_limit = ?6,
                     bandwidth_limit_mb = ?7, country = ?8, expires_at = ?9,
                     last_checked = ?10
                 WHERE id = ?11",
                params![
                    proxy.tier.to_db_string(),
                    proxy.status.to_db_string(),
                    proxy.username,
                    proxy.password,
                    proxy.cost_per_request,
                    proxy.daily_request_limit.map(|v| v as i64),
                    proxy.bandwidth_limit_mb,
                    proxy.country,
                    proxy.expires_at,
                    now,
                    id
                ],
            )?;
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO proxies
             (address, port, tier, provider, status, username, password, cost_per_request,
              daily_request_limit, bandwidth_limit_mb, country, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                proxy.address,
                proxy.port as i64,
                proxy.tier.to_db_string(),
                proxy.provider,
                proxy.status.to_db_string(),
                proxy.username,
                proxy.password,
                proxy.cost_per_request,
                proxy.daily_request_limit.map(|v| v as i64),
                proxy.bandwidth_limit_mb,
                proxy.country,
                proxy.expires_at,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_proxies(&self, tier: Option<ProxyTier>) -> StorageResult<Vec<ProxyRecord>> {
        let proxies = match tier {
            Some(tier) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM proxies WHERE tier = ?1
                     ORDER BY success_rate DESC, average_response_ms ASC",
                    PROXY_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![tier.to_db_string()], Self::row_to_proxy)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM proxies
                     ORDER BY tier ASC, success_rate DESC, average_response_ms ASC",
                    PROXY_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], Self::row_to_proxy)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(proxies)
    }

    fn candidate_proxies(
        &self,
        tier: ProxyTier,
        min_success_rate: f64,
        limit: u32,
    ) -> StorageResult<Vec<ProxyRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM proxies
             WHERE tier = ?1 AND status = 'active' AND success_rate >= ?2
               AND (daily_request_limit IS NULL OR daily_requests < daily_request_limit)
               AND (bandwidth_limit_mb IS NULL
                    OR bytes_used / 1048576.0 < bandwidth_limit_mb)
             ORDER BY success_rate DESC, average_response_ms ASC, total_requests ASC
             LIMIT ?3",
            PROXY_COLUMNS
        ))?;

        let proxies = stmt
            .query_map(
                params![tier.to_db_string(), min_success_rate, limit as i64],
                Self::row_to_proxy,
            )?
            .collect::<rusqlite::Result<_>>()?;
        Ok(proxies)
    }

    fn record_proxy_selection(&mut self, proxy_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE proxies
             SET total_requests = total_requests + 1,
                 daily_requests = daily_requests + 1,
                 total_cost = total_cost + cost_per_request,
                 last_used = ?1
             WHERE id = ?2",
            params![now, proxy_id],
        )?;
        Ok(())
    }

    fn update_proxy_stats(&mut self, record: &ProxyRecord) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE proxies
             SET status = ?1, success_rate = ?2, average_response_ms = ?3,
                 failed_requests = ?4, consecutive_failures = ?5, bytes_used = ?6,
                 last_checked = ?7
             WHERE id = ?8",
            params![
                record.status.to_db_string(),
                record.success_rate,
                record.average_response_ms,
                record.failed_requests as i64,
                record.consecutive_failures as i64,
                record.bytes_used as i64,
                now,
                record.id
            ],
        )?;
        Ok(())
    }

    fn set_proxy_status(&mut self, proxy_id: i64, status: ProxyStatus) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE proxies SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), proxy_id],
        )?;
        Ok(())
    }

    fn reset_daily_counters(&mut self) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;

        let reset = tx.execute("UPDATE proxies SET daily_requests = 0", [])?;
        // Exhausted proxies become selectable again once their counters clear
        tx.execute(
            "UPDATE proxies SET status = 'active' WHERE status = 'exhausted'",
            [],
        )?;

        tx.commit()?;
        Ok(reset as u64)
    }

    fn purge_expired_proxies(&mut self) -> StorageResult<u64> {
        let now = Utc::now().to_rfc3339();
        let purged = self.conn.execute(
            "DELETE FROM proxies WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        Ok(purged as u64)
    }

    fn provider_costs(&self) -> StorageResult<Vec<ProviderCosts>> {
        let mut stmt = self.conn.prepare(
            "SELECT provider, COUNT(*), SUM(total_requests), SUM(total_cost)
             FROM proxies GROUP BY provider ORDER BY SUM(total_cost) DESC",
        )?;

        let costs = stmt
            .query_map([], |row| {
                Ok(ProviderCosts {
                    provider: row.get(0)?,
                    proxy_count: row.get::<_, i64>(1)? as u64,
                    total_requests: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    total_cost: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(costs)
    }

    fn get_proxy_settings(&self) -> StorageResult<ProxySettings> {
        let settings = self
            .conn
            .query_row(
                "SELECT prefer_paid, fallback_to_free, min_success_rate, max_cost_per_request
                 FROM proxy_settings WHERE id = 1",
                [],
                |row| {
                    Ok(ProxySettings {
                        prefer_paid: row.get::<_, i64>(0)? != 0,
                        fallback_to_free: row.get::<_, i64>(1)? != 0,
                        min_success_rate: row.get(2)?,
                        max_cost_per_request: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(settings.unwrap_or_default())
    }

    fn save_proxy_settings(&mut self, settings: &ProxySettings) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO proxy_settings
             (id, prefer_paid, fallback_to_free, min_success_rate, max_cost_per_request)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                settings.prefer_paid as i64,
                settings.fallback_to_free as i64,
                settings.min_success_rate,
                settings.max_cost_per_request
            ],
        )?;
        Ok(())
    }
}
