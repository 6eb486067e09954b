//! Background job scheduling.
//!
//! All jobs are single-flight: an overlapping trigger is dropped with a
//! warning. The sync loop paces itself with the engine's adaptive backoff;
//! everything else runs on fixed intervals plus one nightly batch at
//! 23:30 Kyiv.

use crate::api::AppState;
use crate::config;
use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

const NIGHTLY_HOUR: u32 = 23;
const NIGHTLY_MINUTE: u32 = 30;

/// Spawn every background loop. Tasks run for the process lifetime.
pub fn spawn_all(state: AppState) {
    // Adaptive sync loop.
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                state.sync.run_once().await;
                let secs = state.sync.current_interval_secs();
                sleep(Duration::from_secs(secs)).await;
            }
        });
    }

    // WS stale-connection sweep + cache eviction, every 10 minutes.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(600));
            loop {
                ticker.tick().await;
                state.bus.cleanup_stale(config::WS_MAX_IDLE_SECS);
                state.cache.evict_expired();
            }
        });
    }

    // History pruning, hourly.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                let store = state.store.clone();
                let result = tokio::task::spawn_blocking(move || {
                    store.prune_stock_movements(config::STOCK_MOVEMENT_RETENTION_DAYS)
                })
                .await;
                match result {
                    Ok(Ok(deleted)) if deleted > 0 => {
                        info!(deleted, "pruned stock movement history");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "history pruning failed"),
                    Err(e) => warn!(error = %e, "history pruning task panicked"),
                }
            }
        });
    }

    // Nightly batch at 23:30 Kyiv.
    {
        let state = state.clone();
        let nightly_running = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            loop {
                sleep(until_next_nightly()).await;

                if nightly_running.swap(true, Ordering::SeqCst) {
                    warn!("nightly batch still running, trigger dropped");
                    continue;
                }
                run_nightly(&state).await;
                nightly_running.store(false, Ordering::SeqCst);
            }
        });
    }
}

fn until_next_nightly() -> Duration {
    let now = Utc::now().with_timezone(&config::DISPLAY_TZ);
    let target_time = NaiveTime::from_hms_opt(NIGHTLY_HOUR, NIGHTLY_MINUTE, 0).unwrap();

    let mut target = now.date_naive().and_time(target_time);
    if now.time() >= target_time {
        target += ChronoDuration::days(1);
    }

    let now_naive = now.naive_local();
    let wait = (target - now_naive).to_std().unwrap_or(Duration::from_secs(60));
    // Never a zero sleep: a wakeup drift could otherwise double-fire.
    wait.max(Duration::from_secs(1))
}

/// Nightly batch: catalog + stocks pull, snapshots, seasonality recompute,
/// model training.
async fn run_nightly(state: &AppState) {
    info!("nightly batch started");

    if let Err(e) = state.sync.sync_catalog().await {
        warn!(error = %e, "nightly catalog sync failed");
    }
    if let Err(e) = state.sync.sync_stocks().await {
        warn!(error = %e, "nightly stocks sync failed");
    }

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        store.refresh_silver_utm()?;
        store.refresh_gold_daily_traffic()?;
        store.record_sku_inventory_snapshot()?;
        store.record_inventory_snapshot(false)?;
        for sales in [
            crate::models::SalesFilter::Retail,
            crate::models::SalesFilter::B2b,
        ] {
            store.calculate_seasonality_indices(sales)?;
            store.calculate_yoy_growth(sales)?;
            store.calculate_weekly_patterns(sales)?;
        }
        Ok(())
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "nightly refresh failed"),
        Err(e) => warn!(error = %e, "nightly refresh task panicked"),
    }

    // Milestone check against the monthly goal.
    match state.store.get_goal_progress(crate::models::SalesFilter::Retail) {
        Ok(progress) => {
            state.bus.broadcast(
                crate::ws::DASHBOARD_ROOM,
                crate::models::WsEvent::GoalProgress,
                &progress,
            );
            let percent = progress["percentComplete"].as_f64().unwrap_or(0.0);
            if percent >= 100.0 {
                state.bus.broadcast(
                    crate::ws::DASHBOARD_ROOM,
                    crate::models::WsEvent::MilestoneReached,
                    &serde_json::json!({
                        "milestone": "monthly_goal",
                        "percent": percent,
                    }),
                );
            }
        }
        Err(e) => warn!(error = %e, "goal progress check failed"),
    }

    // Kick training; runs on the blocking pool, result lands in the store.
    let outcome = state.forecaster.train(crate::models::SalesFilter::Retail).await;
    info!(?outcome, "nightly training finished");

    info!("nightly batch done");
}
