//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Trolley database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Crawl sessions
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at TEXT,
    completed_at TEXT,
    processed_items INTEGER NOT NULL DEFAULT 0,
    failed_items INTEGER NOT NULL DEFAULT 0,
    error_log TEXT NOT NULL DEFAULT '',
    metadata TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON crawl_sessions(status);

-- Durable work queue; (url_hash, queue_type) dedups work across stages
CREATE TABLE IF NOT EXISTS crawl_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    queue_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    error_message TEXT,
    category_id INTEGER REFERENCES categories(id),
    product_id INTEGER REFERENCES products(id),
    metadata TEXT,
    created_at TEXT NOT NULL,
    processed_at TEXT,
    leased_at TEXT,
    UNIQUE(url_hash, queue_type)
);

CREATE INDEX IF NOT EXISTS idx_queue_claim
    ON crawl_queue(queue_type, status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_queue_lease ON crawl_queue(status, leased_at);

-- Category taxonomy (tree; level increases strictly from parent to child)
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    level INTEGER NOT NULL DEFAULT 0,
    parent_id INTEGER REFERENCES categories(id),
    is_active INTEGER NOT NULL DEFAULT 1,
    product_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);

-- Products
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    brand TEXT,
    price REAL,
    url TEXT NOT NULL,
    image_url TEXT,
    description TEXT,
    ingredients TEXT,
    storage TEXT,
    is_available INTEGER NOT NULL DEFAULT 1,
    nutrition_scraped INTEGER NOT NULL DEFAULT 0,
    category_id INTEGER REFERENCES categories(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id);
CREATE INDEX IF NOT EXISTS idx_products_nutrition ON products(nutrition_scraped);

-- Nutrition facts, one row per product
CREATE TABLE IF NOT EXISTS nutrition_info (
    product_id INTEGER PRIMARY KEY REFERENCES products(id),
    energy_kj REAL,
    energy_kcal REAL,
    fat REAL,
    saturated_fat REAL,
    carbohydrates REAL,
    sugars REAL,
    fibre REAL,
    protein REAL,
    salt REAL,
    serving_size TEXT,
    other_nutrients TEXT,
    scraped_at TEXT NOT NULL
);

-- Proxy pool
CREATE TABLE IF NOT EXISTS proxies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL,
    port INTEGER NOT NULL,
    tier TEXT NOT NULL,
    provider TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'testing',
    username TEXT,
    password TEXT,
    success_rate REAL NOT NULL DEFAULT 1.0,
    average_response_ms REAL NOT NULL DEFAULT 0,
    total_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    bytes_used INTEGER NOT NULL DEFAULT 0,
    cost_per_request REAL NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    daily_request_limit INTEGER,
    daily_requests INTEGER NOT NULL DEFAULT 0,
    bandwidth_limit_mb REAL,
    country TEXT,
    last_used TEXT,
    last_checked TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(address, port, provider)
);

CREATE INDEX IF NOT EXISTS idx_proxies_selection
    ON proxies(tier, status, success_rate DESC, average_response_ms ASC);

-- Single-row proxy selection settings
CREATE TABLE IF NOT EXISTS proxy_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    prefer_paid INTEGER NOT NULL DEFAULT 1,
    fallback_to_free INTEGER NOT NULL DEFAULT 1,
    min_success_rate REAL NOT NULL DEFAULT 0.5,
    max_cost_per_request REAL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = vec![
            "crawl_sessions",
            "crawl_queue",
            "categories",
            "products",
            "nutrition_info",
            "proxies",
            "proxy_settings",
        ];

        for table in tables {
            let count: Result<i64, _> = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{}'",
                    table
                ),
                [],
                |row| row.get(0),
            );
            assert_eq!(count.unwrap(), 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_queue_dedup_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO crawl_queue (url, url_hash, queue_type, created_at)
             VALUES ('https://x', 'abc', 'product_list', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO crawl_queue (url, url_hash, queue_type, created_at)
             VALUES ('https://x', 'abc', 'product_list', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(dup.is_err());

        // Same hash in a different queue is fine
        conn.execute(
            "INSERT INTO crawl_queue (url, url_hash, queue_type, created_at)
             VALUES ('https://x', 'abc', 'product_detail', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }
}
