//! Compiled-in domain constants and environment lookups.
//!
//! All business tunables live here as constants. The only runtime
//! configuration is credentials, paths and the log level.

use chrono_tz::Tz;
use std::env;
use std::path::{Path, PathBuf};

/// Dashboard dates are Kyiv-local regardless of where the server runs.
pub const DISPLAY_TZ: Tz = chrono_tz::Europe::Kyiv;

/// Order sources shown on the dashboard. Opencart (3) is legacy and excluded.
pub const ACTIVE_SOURCE_IDS: [i64; 3] = [1, 2, 4];

/// Status ids that mark an order as returned/canceled.
pub const RETURN_STATUS_IDS: [i64; 4] = [19, 21, 22, 23];

/// Wholesale manager.
pub const B2B_MANAGER_ID: i64 = 15;

/// Retail manager ids, including historical managers who left (8, 11, 17, 19).
pub const RETAIL_MANAGER_IDS: [i64; 7] = [4, 8, 11, 16, 17, 19, 22];

pub fn source_name(source_id: i64) -> Option<&'static str> {
    match source_id {
        1 => Some("Instagram"),
        2 => Some("Telegram"),
        4 => Some("Shopify"),
        _ => None,
    }
}

pub fn source_color(source_id: i64) -> &'static str {
    match source_id {
        1 => "#7C3AED",
        2 => "#2563EB",
        4 => "#eb4200",
        _ => "#999999",
    }
}

/// Per-source column prefix in gold_daily_revenue.
pub fn source_column(source_id: i64) -> Option<&'static str> {
    match source_id {
        1 => Some("instagram"),
        2 => Some("telegram"),
        4 => Some("shopify"),
        _ => None,
    }
}

// ─── Sync tuning ─────────────────────────────────────────────────────────────

/// Upstream page size.
pub const SYNC_PAGE_LIMIT: u32 = 50;
/// Pause between pages, gentle on the upstream API.
pub const SYNC_PAGE_DELAY_MS: u64 = 300;
/// Look-back window for delayed-sync orders.
pub const SYNC_LOOKBACK_HOURS: i64 = 24;
/// Base polling interval.
pub const SYNC_BASE_INTERVAL_SECS: u64 = 300;
/// Backoff ceiling (doubled during off-hours).
pub const SYNC_MAX_INTERVAL_SECS: u64 = 1800;
/// Off-hours window, Kyiv-local (interval cap doubles inside it).
pub const OFF_HOURS_START: u32 = 2;
pub const OFF_HOURS_END: u32 = 8;

/// Upstream request timeout and retry budget.
pub const UPSTREAM_TIMEOUT_SECS: u64 = 30;
pub const UPSTREAM_MAX_RETRIES: u32 = 3;

/// Sync is reported stale on /api/health after this many seconds.
pub const SYNC_STALE_AFTER_SECS: i64 = 900;

// ─── Product catalog ─────────────────────────────────────────────────────────

/// Brand custom-field markers on upstream products.
pub const BRAND_FIELD_UUID: &str = "CT_1002";
pub const BRAND_FIELD_NAME: &str = "Бренд";

// ─── Caching & retention ─────────────────────────────────────────────────────

/// TTL of memoized hot aggregate reads.
pub const QUERY_CACHE_TTL_SECS: u64 = 30;
/// Stock movement audit rows older than this are pruned.
pub const STOCK_MOVEMENT_RETENTION_DAYS: i64 = 30;
/// WebSocket clients idle longer than this are dropped by the sweep job.
pub const WS_MAX_IDLE_SECS: u64 = 600;

// ─── Environment ─────────────────────────────────────────────────────────────

pub fn api_key() -> anyhow::Result<String> {
    env::var("KEYCRM_API_KEY")
        .map_err(|_| anyhow::anyhow!("KEYCRM_API_KEY is required"))
        .map(|v| v.trim().to_string())
        .and_then(|v| {
            if v.is_empty() {
                Err(anyhow::anyhow!("KEYCRM_API_KEY is empty"))
            } else {
                Ok(v)
            }
        })
}

pub fn api_base() -> String {
    env::var("KEYCRM_API_BASE").unwrap_or_else(|_| "https://openapi.keycrm.app/v1".to_string())
}

pub fn listen_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}

fn default_data_path(filename: &str) -> String {
    // Anchor defaults to the crate directory so running from elsewhere doesn't
    // create a second empty store.
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

pub fn resolve_data_path(env_var: &str, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env::var(env_var).ok().filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    base.join(p).to_string_lossy().to_string()
}

pub fn db_path() -> String {
    resolve_data_path("DB_PATH", "analytics.db")
}

pub fn model_dir() -> PathBuf {
    PathBuf::from(resolve_data_path("MODEL_DIR", "data"))
}

pub fn load_env() {
    // Standard dotenv search (cwd + parents), plus the crate dir explicitly.
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
