//! Embedded analytical store (Bronze/Silver/Gold).
//!
//! Single-writer, many-reader: one process-local SQLite connection in WAL
//! mode behind a mutex. All multi-row operations run inside one transaction.
//!
//! Layer ownership:
//! - Bronze mirrors the upstream feed and is written only by the sync engine.
//! - Silver is fully derivable from Bronze and rebuilt by refresh operations.
//! - Gold is rebuilt from Silver; readers between refreshes may see Bronze
//!   new / Gold old, which is acceptable (bounded by the sync cycle).

pub mod customers;
pub mod goals;
pub mod gold;
pub mod inventory;
pub mod predictions;
pub mod revenue;
pub mod silver;
pub mod sync_ops;
pub mod traffic;

use crate::config;
use crate::errors::{EngineError, EngineResult};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Timestamps are stored UTC in this fixed-width format so lexicographic
/// comparison in SQL matches chronological order.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, TS_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

/// Kyiv-local calendar date of a stored UTC timestamp.
pub fn kyiv_date_of(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&config::DISPLAY_TZ).date_naive()
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = OFF;

-- ─── Bronze: raw upstream mirror ────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY,
    source_id INTEGER NOT NULL,
    status_id INTEGER NOT NULL,
    grand_total REAL NOT NULL,
    ordered_at TEXT,
    created_at TEXT,
    updated_at TEXT,
    buyer_id INTEGER,
    manager_id INTEGER,
    manager_comment TEXT,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS order_products (
    id INTEGER PRIMARY KEY,
    order_id INTEGER NOT NULL,
    product_id INTEGER,
    name TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price_sold REAL NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    category_id INTEGER,
    brand TEXT,
    sku TEXT,
    price REAL,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    parent_id INTEGER,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS offers (
    id INTEGER PRIMARY KEY,
    product_id INTEGER,
    sku TEXT,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS offer_stocks (
    id INTEGER PRIMARY KEY,
    sku TEXT,
    price REAL,
    purchased_price REAL,
    quantity INTEGER NOT NULL DEFAULT 0,
    reserve INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS expense_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    alias TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY,
    order_id INTEGER NOT NULL,
    expense_type_id INTEGER,
    amount REAL NOT NULL,
    description TEXT,
    status TEXT,
    payment_date TEXT,
    created_at TEXT,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS managers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    status TEXT,
    is_retail INTEGER NOT NULL DEFAULT 0,
    first_order_date TEXT,
    last_order_date TEXT,
    order_count INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS buyers (
    id INTEGER PRIMARY KEY,
    full_name TEXT,
    phone TEXT,
    synced_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

-- ─── Silver: conformed business view ────────────────────────────────────────

CREATE TABLE IF NOT EXISTS silver_orders (
    id INTEGER PRIMARY KEY,
    order_date TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    source_name TEXT NOT NULL,
    status_id INTEGER NOT NULL,
    grand_total REAL NOT NULL,
    buyer_id INTEGER,
    manager_id INTEGER,
    is_return INTEGER NOT NULL,
    is_active_source INTEGER NOT NULL,
    sales_type TEXT NOT NULL,
    is_new_customer INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS silver_order_utm (
    order_id INTEGER PRIMARY KEY,
    utm_source TEXT,
    utm_medium TEXT,
    utm_campaign TEXT,
    utm_content TEXT,
    utm_term TEXT,
    utm_lang TEXT,
    fbp TEXT,
    fbc TEXT,
    ttp TEXT,
    fbclid TEXT,
    traffic_type TEXT NOT NULL,
    platform TEXT NOT NULL,
    parsed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

-- ─── Gold: pre-aggregated analytics ─────────────────────────────────────────

CREATE TABLE IF NOT EXISTS gold_daily_revenue (
    date TEXT NOT NULL,
    sales_type TEXT NOT NULL,
    revenue REAL NOT NULL DEFAULT 0,
    orders_count INTEGER NOT NULL DEFAULT 0,
    avg_order_value REAL NOT NULL DEFAULT 0,
    returns_count INTEGER NOT NULL DEFAULT 0,
    returns_revenue REAL NOT NULL DEFAULT 0,
    unique_customers INTEGER NOT NULL DEFAULT 0,
    new_customers INTEGER NOT NULL DEFAULT 0,
    returning_customers INTEGER NOT NULL DEFAULT 0,
    instagram_orders INTEGER NOT NULL DEFAULT 0,
    instagram_revenue REAL NOT NULL DEFAULT 0,
    telegram_orders INTEGER NOT NULL DEFAULT 0,
    telegram_revenue REAL NOT NULL DEFAULT 0,
    shopify_orders INTEGER NOT NULL DEFAULT 0,
    shopify_revenue REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (date, sales_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS gold_daily_products (
    date TEXT NOT NULL,
    sales_type TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    product_id INTEGER,
    product_name TEXT NOT NULL,
    category_id INTEGER,
    category_name TEXT,
    parent_category_name TEXT,
    brand TEXT,
    quantity_sold INTEGER NOT NULL DEFAULT 0,
    product_revenue REAL NOT NULL DEFAULT 0,
    order_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (date, sales_type, source_id, product_id, product_name)
);

CREATE TABLE IF NOT EXISTS gold_daily_traffic (
    date TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    sales_type TEXT NOT NULL,
    platform TEXT NOT NULL,
    traffic_type TEXT NOT NULL,
    orders_count INTEGER NOT NULL DEFAULT 0,
    revenue REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (date, source_id, sales_type, platform, traffic_type)
) WITHOUT ROWID;

-- ─── Operational tables ─────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS sku_inventory_status (
    offer_id INTEGER PRIMARY KEY,
    product_id INTEGER NOT NULL DEFAULT 0,
    sku TEXT NOT NULL,
    name TEXT,
    brand TEXT,
    category_id INTEGER,
    quantity INTEGER NOT NULL DEFAULT 0,
    reserve INTEGER NOT NULL DEFAULT 0,
    price REAL NOT NULL DEFAULT 0,
    purchased_price REAL,
    last_sale_date TEXT,
    first_seen_at TEXT NOT NULL,
    last_stock_out_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS inventory_sku_history (
    date TEXT NOT NULL,
    offer_id INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    reserve INTEGER NOT NULL,
    price REAL NOT NULL,
    PRIMARY KEY (date, offer_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS inventory_history (
    date TEXT PRIMARY KEY,
    total_quantity INTEGER NOT NULL,
    total_value REAL NOT NULL,
    total_reserve INTEGER NOT NULL DEFAULT 0,
    sku_count INTEGER NOT NULL DEFAULT 0,
    recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS stock_movements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    offer_id INTEGER NOT NULL,
    product_id INTEGER,
    movement_type TEXT NOT NULL,
    quantity_before INTEGER NOT NULL,
    quantity_after INTEGER NOT NULL,
    delta INTEGER NOT NULL,
    reserve_before INTEGER NOT NULL,
    reserve_after INTEGER NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
);

CREATE TABLE IF NOT EXISTS revenue_predictions (
    prediction_date TEXT NOT NULL,
    sales_type TEXT NOT NULL,
    predicted_revenue REAL NOT NULL,
    model_mae REAL NOT NULL DEFAULT 0,
    model_mape REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
    PRIMARY KEY (prediction_date, sales_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS revenue_goals (
    period_type TEXT NOT NULL,
    sales_type TEXT NOT NULL DEFAULT 'retail',
    goal_amount REAL NOT NULL,
    is_custom INTEGER NOT NULL DEFAULT 0,
    calculated_goal REAL,
    growth_factor REAL NOT NULL DEFAULT 1.10,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
    PRIMARY KEY (period_type, sales_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS seasonal_indices (
    month INTEGER NOT NULL,
    sales_type TEXT NOT NULL DEFAULT 'retail',
    seasonality_index REAL,
    sample_size INTEGER,
    avg_revenue REAL,
    min_revenue REAL,
    max_revenue REAL,
    yoy_growth REAL,
    confidence TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
    PRIMARY KEY (month, sales_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS weekly_patterns (
    month INTEGER NOT NULL,
    week_of_month INTEGER NOT NULL,
    sales_type TEXT NOT NULL DEFAULT 'retail',
    weight REAL,
    sample_size INTEGER,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
    PRIMARY KEY (month, week_of_month, sales_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS growth_metrics (
    metric_type TEXT NOT NULL,
    sales_type TEXT NOT NULL DEFAULT 'retail',
    value REAL,
    period_start TEXT,
    period_end TEXT,
    sample_size INTEGER,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
    PRIMARY KEY (metric_type, sales_type)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
) WITHOUT ROWID;

-- ─── Indexes ────────────────────────────────────────────────────────────────

CREATE INDEX IF NOT EXISTS idx_orders_ordered_at ON orders(ordered_at);
CREATE INDEX IF NOT EXISTS idx_orders_source_date ON orders(source_id, ordered_at);
CREATE INDEX IF NOT EXISTS idx_orders_status_date ON orders(status_id, ordered_at);
CREATE INDEX IF NOT EXISTS idx_orders_manager_date ON orders(manager_id, ordered_at);
CREATE INDEX IF NOT EXISTS idx_orders_buyer_date ON orders(buyer_id, ordered_at);
CREATE INDEX IF NOT EXISTS idx_order_products_order_id ON order_products(order_id);
CREATE INDEX IF NOT EXISTS idx_order_products_product_id ON order_products(product_id);
CREATE INDEX IF NOT EXISTS idx_products_category_id ON products(category_id);
CREATE INDEX IF NOT EXISTS idx_products_brand ON products(brand);
CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);
CREATE INDEX IF NOT EXISTS idx_expenses_order_id ON expenses(order_id);
CREATE INDEX IF NOT EXISTS idx_expenses_payment_date ON expenses(payment_date);
CREATE INDEX IF NOT EXISTS idx_silver_orders_date ON silver_orders(order_date);
CREATE INDEX IF NOT EXISTS idx_silver_orders_buyer ON silver_orders(buyer_id, order_date);
CREATE INDEX IF NOT EXISTS idx_silver_orders_type_date ON silver_orders(sales_type, order_date);
CREATE INDEX IF NOT EXISTS idx_gold_revenue_date ON gold_daily_revenue(date);
CREATE INDEX IF NOT EXISTS idx_gold_products_date ON gold_daily_products(date, sales_type);
CREATE INDEX IF NOT EXISTS idx_gold_products_brand ON gold_daily_products(brand);
CREATE INDEX IF NOT EXISTS idx_gold_traffic_date ON gold_daily_traffic(date);
CREATE INDEX IF NOT EXISTS idx_sku_status_category ON sku_inventory_status(category_id);
CREATE INDEX IF NOT EXISTS idx_sku_status_brand ON sku_inventory_status(brand);
CREATE INDEX IF NOT EXISTS idx_sku_history_offer ON inventory_sku_history(offer_id, date DESC);
CREATE INDEX IF NOT EXISTS idx_stock_movements_offer ON stock_movements(offer_id, recorded_at DESC);
CREATE INDEX IF NOT EXISTS idx_stock_movements_recorded ON stock_movements(recorded_at);
"#;

/// Single-writer embedded analytical store.
pub struct AnalyticsStore {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl AnalyticsStore {
    /// Open (or create) the store. Schema failures are fatal: a store that
    /// cannot migrate must refuse to serve.
    pub fn new(db_path: &str) -> EngineResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // locking handled by our own mutex

        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| EngineError::StoreSchema(format!("open {db_path}: {e}")))?;

        Self::register_functions(&conn)
            .map_err(|e| EngineError::StoreSchema(format!("register functions: {e}")))?;

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| EngineError::StoreSchema(format!("schema init: {e}")))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let order_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
            .unwrap_or(0);
        info!(db_path, orders = order_count, "analytics store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_string(),
        })
    }

    /// `kyiv_date(ts)` — Kyiv-local calendar date of a stored UTC timestamp.
    /// Keeps the Silver/Gold rebuild SQL declarative.
    fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
        conn.create_scalar_function(
            "kyiv_date",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let raw: Option<String> = ctx.get(0)?;
                Ok(raw
                    .as_deref()
                    .and_then(parse_ts)
                    .map(|ts| fmt_date(kyiv_date_of(ts))))
            },
        )
    }

    /// Run a read against the shared connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure inside a single transaction. Rolls back on error and
    /// surfaces it to the caller.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Drop rolls the transaction back.
                Err(e)
            }
        }
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Row counts + file size for /api/health.
    pub fn stats(&self) -> Result<Value> {
        let (orders, products, categories, managers) = self.with_conn(|conn| {
            let count = |table: &str| -> rusqlite::Result<i64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            };
            Ok((
                count("orders")?,
                count("products")?,
                count("categories")?,
                count("managers")?,
            ))
        })?;

        let db_size_mb = std::fs::metadata(&self.db_path)
            .map(|m| (m.len() as f64) / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        Ok(json!({
            "orders": orders,
            "products": products,
            "categories": categories,
            "managers": managers,
            "db_size_mb": (db_size_mb * 100.0).round() / 100.0,
        }))
    }

    // ─── sync_metadata ──────────────────────────────────────────────────────

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM sync_metadata WHERE key = ?1 LIMIT 1",
                    [key],
                    |row| row.get(0),
                )
                .ok()
                .flatten();
            Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        })
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_metadata (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn get_last_sync_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get_metadata(key)?.as_deref().and_then(parse_ts))
    }

    pub fn set_last_sync_time(&self, key: &str, ts: DateTime<Utc>) -> Result<()> {
        self.set_metadata(key, &fmt_ts(ts))
    }
}

/// Round a monetary value to 2 decimals for API payloads.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to 1 decimal, used for percentages.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kyiv_date_shifts_late_evening_to_next_day() {
        // 22:30 UTC is 01:30 Kyiv summer time the next day.
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 22, 30, 0).unwrap();
        assert_eq!(fmt_date(kyiv_date_of(ts)), "2024-06-02");

        let noon = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(fmt_date(kyiv_date_of(noon)), "2024-06-01");
    }

    #[test]
    fn ts_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 8, 45, 12).unwrap();
        assert_eq!(parse_ts(&fmt_ts(ts)), Some(ts));
        // RFC3339 input is accepted too.
        assert_eq!(parse_ts("2024-01-15T08:45:12Z"), Some(ts));
    }

    #[test]
    fn store_opens_and_reports_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = AnalyticsStore::new(path.to_str().unwrap()).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats["orders"], 0);

        store.set_metadata("orders", "2024-06-01 10:00:00").unwrap();
        assert_eq!(
            store.get_metadata("orders").unwrap().as_deref(),
            Some("2024-06-01 10:00:00")
        );
    }
}
