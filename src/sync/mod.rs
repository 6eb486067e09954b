//! Incremental sync engine: polls the upstream order feed, upserts Bronze,
//! refreshes Silver/Gold and fans out events.
//!
//! Cycle shape (single-flight; a trigger while running is dropped):
//!
//! ```text
//! IDLE → FETCHING(page=1) → UPSERTING → [more pages?] → FETCHING → …
//!                 ↘ ERROR(attempt<3) ↗            ↘ DONE → REFRESH_SILVER
//!                 ↘ ERROR(attempt=3) → LOG → IDLE        → REFRESH_GOLD
//!                                                         → EMIT_EVENT → IDLE
//! ```

pub mod upstream;

use crate::cache::QueryCache;
use crate::config;
use crate::events::EventBus;
use crate::models::{SyncStats, WsEvent};
use crate::store::sync_ops::AppliedOrder;
use crate::store::{fmt_date, fmt_ts, kyiv_date_of, AnalyticsStore};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use upstream::KeyCrmClient;

/// Orders sync starts this far back on a fresh store.
const INITIAL_SYNC_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cycle ran; carries the number of applied orders.
    Completed(usize),
    /// Another cycle is in flight; this trigger was dropped.
    AlreadyRunning,
    /// Upstream kept failing; the cycle was skipped.
    Skipped,
}

#[derive(Debug, Default)]
struct EngineState {
    consecutive_empty: u32,
    last_sync: Option<DateTime<Utc>>,
    cycles_run: u64,
    last_cycle_upserted: u64,
}

pub struct SyncEngine {
    store: Arc<AnalyticsStore>,
    client: KeyCrmClient,
    bus: Arc<EventBus>,
    cache: Arc<QueryCache>,
    state: Mutex<EngineState>,
    running: tokio::sync::Mutex<()>,
}

/// Adaptive polling interval. After k ≥ 2 consecutive empty cycles the
/// interval doubles per extra empty cycle, capped at the ceiling (doubled
/// during Kyiv off-hours).
pub fn backoff_interval(consecutive_empty: u32, off_hours: bool) -> u64 {
    let base = config::SYNC_BASE_INTERVAL_SECS;
    let cap = if off_hours {
        config::SYNC_MAX_INTERVAL_SECS * 2
    } else {
        config::SYNC_MAX_INTERVAL_SECS
    };
    if consecutive_empty < 2 {
        return base;
    }
    let exp = (consecutive_empty - 1).min(16);
    base.saturating_mul(1u64 << exp).min(cap)
}

pub fn is_off_hours(now: DateTime<Utc>) -> bool {
    let hour = now.with_timezone(&config::DISPLAY_TZ).hour();
    (config::OFF_HOURS_START..config::OFF_HOURS_END).contains(&hour)
}

impl SyncEngine {
    pub fn new(
        store: Arc<AnalyticsStore>,
        client: KeyCrmClient,
        bus: Arc<EventBus>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            store,
            client,
            bus,
            cache,
            state: Mutex::new(EngineState::default()),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// One full sync cycle. Single-flight: a second trigger while running
    /// returns immediately.
    pub async fn run_once(&self) -> CycleOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("sync cycle already running, trigger dropped");
            return CycleOutcome::AlreadyRunning;
        };

        let cycle_start = Utc::now();
        let since = match self.store.get_last_sync_time("orders") {
            Ok(Some(ts)) => ts,
            _ => cycle_start - ChronoDuration::days(INITIAL_SYNC_DAYS),
        };
        // Look-back buffer catches orders whose upstream sync lags their
        // ordered_at.
        let window_from = since - ChronoDuration::hours(config::SYNC_LOOKBACK_HOURS);

        info!(
            since = %fmt_ts(since),
            window_from = %fmt_ts(window_from),
            "sync cycle started"
        );

        let mut applied: Vec<AppliedOrder> = Vec::new();
        let mut page = 1u32;
        loop {
            let fetched = match self
                .client
                .get_orders_page(window_from, cycle_start, page)
                .await
            {
                Ok(page_data) => page_data,
                Err(e) => {
                    // Retries are exhausted inside the client.
                    warn!(page, error = %e, "sync cycle skipped after upstream failures");
                    self.finish_cycle(cycle_start, None);
                    return CycleOutcome::Skipped;
                }
            };

            let batch_len = fetched.data.len();
            if batch_len == 0 {
                break;
            }

            let store = self.store.clone();
            let outcome = match tokio::task::spawn_blocking(move || {
                store.upsert_orders(&fetched.data)
            })
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(page, error = %e, "store write failed, aborting cycle");
                    self.finish_cycle(cycle_start, None);
                    return CycleOutcome::Skipped;
                }
                Err(e) => {
                    warn!(page, error = %e, "upsert task panicked, aborting cycle");
                    self.finish_cycle(cycle_start, None);
                    return CycleOutcome::Skipped;
                }
            };
            applied.extend(outcome.applied);

            if batch_len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        if !applied.is_empty() {
            // DONE → REFRESH_SILVER → REFRESH_GOLD
            let store = self.store.clone();
            let refreshed = tokio::task::spawn_blocking(move || -> Result<()> {
                store.refresh_analytics_layers()?;
                store.update_manager_stats()?;
                Ok(())
            })
            .await;
            match refreshed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Bronze write stands; Gold is eventually consistent.
                    warn!(error = %e, "analytics refresh failed after bronze write");
                }
                Err(e) => warn!(error = %e, "refresh task panicked"),
            }

            self.cache.clear();
            self.emit_orders_synced(&applied, since, cycle_start);
        }

        info!(
            pages = page,
            applied = applied.len(),
            "sync cycle finished"
        );
        self.finish_cycle(cycle_start, Some(applied.len()));
        CycleOutcome::Completed(applied.len())
    }

    /// EMIT_EVENT: notify dashboard clients about freshly applied orders.
    /// Only orders whose `ordered_at` falls inside `[since, now]` count for
    /// the notification; look-back re-deliveries stay silent.
    fn emit_orders_synced(
        &self,
        applied: &[AppliedOrder],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let fresh: Vec<&AppliedOrder> = applied
            .iter()
            .filter(|o| o.ordered_at >= since && o.ordered_at <= now)
            .collect();
        if fresh.is_empty() {
            return;
        }

        let sales_types: BTreeSet<&str> =
            fresh.iter().map(|o| o.sales_type.as_str()).collect();
        let min_date = fresh.iter().map(|o| o.ordered_at).min().unwrap();
        let max_date = fresh.iter().map(|o| o.ordered_at).max().unwrap();

        self.bus.broadcast(
            crate::ws::DASHBOARD_ROOM,
            WsEvent::OrdersSynced,
            &serde_json::json!({
                "count": fresh.len(),
                "sales_types_touched": sales_types,
                "date_range": {
                    "from": fmt_date(kyiv_date_of(min_date)),
                    "to": fmt_date(kyiv_date_of(max_date)),
                },
            }),
        );
    }

    fn finish_cycle(&self, cycle_start: DateTime<Utc>, applied: Option<usize>) {
        if applied.is_some() {
            // Advance the cursor only on a completed cycle so a skipped one
            // retries the same window.
            if let Err(e) = self.store.set_last_sync_time("orders", cycle_start) {
                warn!(error = %e, "failed to persist sync cursor");
            }
        }

        let mut state = self.state.lock();
        state.cycles_run += 1;
        match applied {
            Some(0) | None => state.consecutive_empty += 1,
            Some(_) => state.consecutive_empty = 0,
        }
        if let Some(count) = applied {
            state.last_cycle_upserted = count as u64;
            state.last_sync = Some(cycle_start);
        }
    }

    /// Pull the full catalog: products, categories, managers.
    pub async fn sync_catalog(&self) -> Result<usize> {
        let mut total = 0usize;

        let mut page = 1u32;
        loop {
            let fetched = self.client.get_products_page(page).await?;
            let len = fetched.data.len();
            if len == 0 {
                break;
            }
            let store = self.store.clone();
            total += tokio::task::spawn_blocking(move || store.upsert_products(&fetched.data))
                .await??;
            if len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        let mut page = 1u32;
        loop {
            let fetched = self.client.get_categories_page(page).await?;
            let len = fetched.data.len();
            if len == 0 {
                break;
            }
            let store = self.store.clone();
            total += tokio::task::spawn_blocking(move || store.upsert_categories(&fetched.data))
                .await??;
            if len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        let mut page = 1u32;
        loop {
            let fetched = self.client.get_managers_page(page).await?;
            let len = fetched.data.len();
            if len == 0 {
                break;
            }
            let store = self.store.clone();
            total += tokio::task::spawn_blocking(move || store.upsert_managers(&fetched.data))
                .await??;
            if len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        let mut page = 1u32;
        loop {
            let fetched = self.client.get_expense_types_page(page).await?;
            let len = fetched.data.len();
            if len == 0 {
                break;
            }
            let store = self.store.clone();
            total += tokio::task::spawn_blocking(move || store.upsert_expense_types(&fetched.data))
                .await??;
            if len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        info!(total, "catalog sync finished");
        Ok(total)
    }

    /// Pull offers + stocks, refresh the SKU status table, notify clients.
    pub async fn sync_stocks(&self) -> Result<usize> {
        let mut total = 0usize;
        let mut movements = 0usize;

        // Offers first so stock movement rows resolve product ids.
        let mut page = 1u32;
        loop {
            let fetched = self.client.get_offers_page(page).await?;
            let len = fetched.data.len();
            if len == 0 {
                break;
            }
            let store = self.store.clone();
            total += tokio::task::spawn_blocking(move || store.upsert_offers(&fetched.data))
                .await??;
            if len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        let mut page = 1u32;
        loop {
            let fetched = self.client.get_stocks_page(page).await?;
            let len = fetched.data.len();
            if len == 0 {
                break;
            }
            let store = self.store.clone();
            let outcome = tokio::task::spawn_blocking(move || store.upsert_stocks(&fetched.data))
                .await??;
            total += outcome.upserted;
            movements += outcome.movements;
            if len < config::SYNC_PAGE_LIMIT as usize {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(config::SYNC_PAGE_DELAY_MS)).await;
        }

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.refresh_sku_inventory_status()).await??;
        self.store.set_last_sync_time("stocks_last_sync", Utc::now())?;
        self.cache.clear();

        self.bus.broadcast(
            crate::ws::DASHBOARD_ROOM,
            WsEvent::InventoryUpdated,
            &serde_json::json!({"stocks": total, "movements": movements}),
        );

        info!(total, movements, "stocks sync finished");
        Ok(total)
    }

    pub fn current_interval_secs(&self) -> u64 {
        let state = self.state.lock();
        backoff_interval(state.consecutive_empty, is_off_hours(Utc::now()))
    }

    pub fn stats(&self) -> SyncStats {
        let state = self.state.lock();
        let last_sync = state
            .last_sync
            .or_else(|| self.store.get_last_sync_time("orders").ok().flatten());
        SyncStats {
            last_sync_time: last_sync.map(fmt_ts),
            seconds_since_sync: last_sync.map(|ts| (Utc::now() - ts).num_seconds()),
            consecutive_empty_syncs: state.consecutive_empty,
            current_backoff_seconds: backoff_interval(
                state.consecutive_empty,
                is_off_hours(Utc::now()),
            ),
            is_off_hours: is_off_hours(Utc::now()),
            cycles_run: state.cycles_run,
            last_cycle_upserted: state.last_cycle_upserted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backoff_stays_at_base_until_two_empty_cycles() {
        assert_eq!(backoff_interval(0, false), 300);
        assert_eq!(backoff_interval(1, false), 300);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_interval(2, false), 600);
        assert_eq!(backoff_interval(3, false), 1200);
        assert_eq!(backoff_interval(4, false), 1800); // 2400 capped
        assert_eq!(backoff_interval(10, false), 1800);
    }

    #[test]
    fn off_hours_doubles_the_cap() {
        assert_eq!(backoff_interval(4, true), 2400);
        assert_eq!(backoff_interval(5, true), 3600); // 4800 capped at 3600
        assert_eq!(backoff_interval(10, true), 3600);
    }

    #[test]
    fn off_hours_window_is_kyiv_local() {
        // 00:30 UTC is 03:30 Kyiv (summer): off-hours.
        let night = Utc.with_ymd_and_hms(2024, 6, 1, 0, 30, 0).unwrap();
        assert!(is_off_hours(night));
        // 10:00 UTC is 13:00 Kyiv: working hours.
        let day = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert!(!is_off_hours(day));
        // 06:30 UTC is 09:30 Kyiv: already past the window.
        let morning = Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 0).unwrap();
        assert!(!is_off_hours(morning));
    }
}
