//! HTTP handlers: thin mapping from requests to the query layer, sync
//! engine and forecaster.

use super::params::{kyiv_today, CommonQuery};
use super::{ApiError, AppState};
use crate::cache::QueryCache;
use crate::models::SalesFilter;
use crate::sync::CycleOutcome;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Datelike, Days, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};

type ApiResult = Result<Json<Value>, ApiError>;

// ─── Health ──────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.started_at.elapsed();

    let (store_status, store_stats, db_latency_ms) = {
        let t0 = std::time::Instant::now();
        match state.store.stats() {
            Ok(stats) => (
                "connected",
                Some(stats),
                Some(t0.elapsed().as_secs_f64() * 1000.0),
            ),
            Err(_) => ("error", None, None),
        }
    };

    let sync_stats = state.sync.stats();
    let sync_stale = sync_stats
        .seconds_since_sync
        .map(|s| s > crate::config::SYNC_STALE_AFTER_SECS)
        .unwrap_or(false);

    let status = if store_stats.is_none() || sync_stale {
        "degraded"
    } else {
        "healthy"
    };

    Json(json!({
        "status": status,
        "uptime_seconds": uptime.as_secs(),
        "store": {
            "status": store_status,
            "latency_ms": db_latency_ms.map(|v| (v * 100.0).round() / 100.0),
            "stats": store_stats,
        },
        "sync": sync_stats,
        "forecaster": state.forecaster.status(),
        "websocket": state.bus.stats(),
    }))
}

// ─── Revenue ─────────────────────────────────────────────────────────────────

pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let filter = query.filter()?;
    let key = QueryCache::key("summary", &query.cache_params());
    let value = state
        .cache
        .get_or_compute(key, || state.store.get_summary_stats(&filter))?;
    Ok(Json(value))
}

pub async fn revenue_trend(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let filter = query.filter()?;
    let compare = query.compare_window()?;
    let key = QueryCache::key("revenue_trend", &query.cache_params());

    let mut value = state.cache.get_or_compute(key, || {
        state.store.get_revenue_trend(&filter, true, compare)
    })?;

    // Forecast extension: only for the unfiltered current month/week, and
    // only when a trained model has stored predictions.
    if query.forecast_applicable() {
        if let Ok(forecast) = state.forecaster.get_forecast(filter.sales) {
            if forecast["status"] != "unavailable" {
                if let Some(labels) = value.get_mut("labels").and_then(|l| l.as_array_mut()) {
                    let today = kyiv_today();
                    let month_end = last_day_of_month(today);
                    let mut day = today + Days::new(1);
                    while day <= month_end {
                        labels.push(json!(day.format("%d.%m").to_string()));
                        day = day + Days::new(1);
                    }
                }
                value["forecast"] = forecast;
            }
        }
    }

    Ok(Json(value))
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1).unwrap()
    };
    next - Days::new(1)
}

pub async fn sales_by_source(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let filter = query.filter()?;
    let key = QueryCache::key("sales_by_source", &query.cache_params());
    let value = state
        .cache
        .get_or_compute(key, || state.store.get_sales_by_source(&filter))?;
    Ok(Json(value))
}

pub async fn returns_list(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let (start, end) = query.date_range()?;
    let sales = query.sales()?;
    let limit = query.limit_or(50, 500);
    let value = state.store.get_return_orders(start, end, sales, limit)?;
    Ok(Json(value))
}

// ─── Products & brands ───────────────────────────────────────────────────────

pub async fn products_top(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let filter = query.filter()?;
    let limit = query.limit_or(10, 100);
    let key = QueryCache::key("products_top", &query.cache_params());
    let value = state
        .cache
        .get_or_compute(key, || state.store.get_top_products(&filter, limit))?;
    Ok(Json(value))
}

pub async fn products_performance(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let filter = query.filter()?;
    Ok(Json(state.store.get_product_performance(&filter)?))
}

pub async fn brand_analytics(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let filter = query.filter()?;
    Ok(Json(state.store.get_brand_analytics(&filter)?))
}

pub async fn filter_categories(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.store.get_categories()?))
}

#[derive(Debug, Deserialize)]
pub struct ChildCategoriesQuery {
    pub parent_id: i64,
}

pub async fn filter_child_categories(
    State(state): State<AppState>,
    Query(query): Query<ChildCategoriesQuery>,
) -> ApiResult {
    Ok(Json(state.store.get_child_categories(query.parent_id)?))
}

pub async fn filter_brands(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.store.get_brands()?))
}

// ─── Customers ───────────────────────────────────────────────────────────────

pub async fn customers_insights(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let (start, end) = query.date_range()?;
    let sales = query.sales()?;
    Ok(Json(state.store.get_customer_insights(start, end, sales)?))
}

#[derive(Debug, Deserialize, Default)]
pub struct CohortQuery {
    pub months_back: Option<u32>,
    pub retention_months: Option<u32>,
    pub sales_type: Option<String>,
    pub enhanced: Option<bool>,
}

pub async fn customers_cohorts(
    State(state): State<AppState>,
    Query(query): Query<CohortQuery>,
) -> ApiResult {
    let sales: SalesFilter = match &query.sales_type {
        None => SalesFilter::Retail,
        Some(raw) => raw
            .parse()
            .map_err(crate::errors::EngineError::Validation)?,
    };
    let months_back = query.months_back.unwrap_or(12).clamp(1, 36);
    let retention_months = query.retention_months.unwrap_or(6).clamp(1, 24);
    let value = state.store.get_cohort_retention(
        months_back,
        retention_months,
        sales,
        query.enhanced.unwrap_or(false),
    )?;
    Ok(Json(value))
}

pub async fn customers_second_purchase(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let sales = query.sales()?;
    Ok(Json(state.store.get_days_to_second_purchase(sales)?))
}

pub async fn customers_ltv(
    State(state): State<AppState>,
    Query(query): Query<CohortQuery>,
) -> ApiResult {
    let sales: SalesFilter = match &query.sales_type {
        None => SalesFilter::Retail,
        Some(raw) => raw
            .parse()
            .map_err(crate::errors::EngineError::Validation)?,
    };
    let months_back = query.months_back.unwrap_or(12).clamp(1, 36);
    Ok(Json(state.store.get_cohort_ltv(months_back, sales)?))
}

#[derive(Debug, Deserialize)]
pub struct AtRiskQuery {
    pub days_threshold: Option<i64>,
    pub sales_type: Option<String>,
    pub limit: Option<usize>,
}

pub async fn customers_at_risk(
    State(state): State<AppState>,
    Query(query): Query<AtRiskQuery>,
) -> ApiResult {
    let sales: SalesFilter = match &query.sales_type {
        None => SalesFilter::Retail,
        Some(raw) => raw
            .parse()
            .map_err(crate::errors::EngineError::Validation)?,
    };
    let days = query.days_threshold.unwrap_or(90).clamp(1, 3650);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.store.get_at_risk_customers(days, sales, limit)?))
}

// ─── Inventory ───────────────────────────────────────────────────────────────

pub async fn stocks_summary(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let limit = query.limit_or(20, 100);
    Ok(Json(state.store.get_stock_summary(limit)?))
}

pub async fn stocks_analysis(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.store.get_inventory_analysis()?))
}

pub async fn stocks_actions(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.store.get_inventory_actions()?))
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub days: Option<i64>,
}

pub async fn stocks_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    Ok(Json(state.store.get_inventory_trend(days)?))
}

pub async fn stocks_average(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    Ok(Json(state.store.get_average_inventory(days)?))
}

// ─── Expenses ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExpensesImportBody {
    pub order_id: i64,
    pub expenses: Vec<crate::models::UpstreamExpense>,
}

/// Expense records arrive from the reporting flow, not the order feed.
pub async fn expenses_import(
    State(state): State<AppState>,
    Json(body): Json<ExpensesImportBody>,
) -> ApiResult {
    let count = state.store.upsert_expenses(body.order_id, &body.expenses)?;
    if count > 0 {
        state.cache.clear();
        state.bus.broadcast(
            crate::ws::DASHBOARD_ROOM,
            crate::models::WsEvent::ExpensesUpdated,
            &json!({"order_id": body.order_id, "count": count}),
        );
    }
    Ok(Json(json!({"status": "ok", "upserted": count})))
}

// ─── Goals ───────────────────────────────────────────────────────────────────

pub async fn goals_get(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let sales = query.sales()?;
    Ok(Json(state.store.get_smart_goals(sales)?))
}

#[derive(Debug, Deserialize)]
pub struct GoalBody {
    pub period_type: String,
    pub sales_type: Option<String>,
    pub amount: f64,
}

const GOAL_PERIODS: [&str; 3] = ["daily", "weekly", "monthly"];

pub async fn goals_post(
    State(state): State<AppState>,
    Json(body): Json<GoalBody>,
) -> ApiResult {
    if !GOAL_PERIODS.contains(&body.period_type.as_str()) {
        return Err(crate::errors::EngineError::Validation(format!(
            "period_type must be one of {GOAL_PERIODS:?}"
        ))
        .into());
    }
    if !body.amount.is_finite() || body.amount <= 0.0 {
        return Err(
            crate::errors::EngineError::Validation("amount must be positive".to_string()).into(),
        );
    }
    let sales: SalesFilter = match &body.sales_type {
        None => SalesFilter::Retail,
        Some(raw) => raw
            .parse()
            .map_err(crate::errors::EngineError::Validation)?,
    };

    state
        .store
        .set_custom_goal(&body.period_type, sales, body.amount)?;
    state.cache.clear();
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
pub struct GoalDeleteQuery {
    pub period_type: String,
    pub sales_type: Option<String>,
}

pub async fn goals_delete(
    State(state): State<AppState>,
    Query(query): Query<GoalDeleteQuery>,
) -> ApiResult {
    let sales: SalesFilter = match &query.sales_type {
        None => SalesFilter::Retail,
        Some(raw) => raw
            .parse()
            .map_err(crate::errors::EngineError::Validation)?,
    };
    let removed = state.store.clear_custom_goal(&query.period_type, sales)?;
    state.cache.clear();
    Ok(Json(json!({"status": "ok", "removed": removed})))
}

pub async fn goals_progress(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let sales = query.sales()?;
    Ok(Json(state.store.get_goal_progress(sales)?))
}

// ─── Traffic ─────────────────────────────────────────────────────────────────

pub async fn traffic_analytics(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let (start, end) = query.date_range()?;
    let sales = query.sales()?;
    Ok(Json(state.store.get_traffic_analytics(
        start,
        end,
        sales,
        query.source_id,
    )?))
}

pub async fn traffic_trend(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let (start, end) = query.date_range()?;
    let sales = query.sales()?;
    Ok(Json(state.store.get_traffic_trend(
        start,
        end,
        sales,
        query.source_id,
    )?))
}

#[derive(Debug, Deserialize, Default)]
pub struct TrafficTransactionsQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sales_type: Option<String>,
    pub source_id: Option<i64>,
    pub traffic_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn traffic_transactions(
    State(state): State<AppState>,
    Query(query): Query<TrafficTransactionsQuery>,
) -> ApiResult {
    let common = CommonQuery {
        period: query.period.clone(),
        start_date: query.start_date.clone(),
        end_date: query.end_date.clone(),
        sales_type: query.sales_type.clone(),
        source_id: query.source_id,
        limit: query.limit,
        ..Default::default()
    };
    let (start, end) = common.date_range()?;
    let sales = common.sales()?;
    let limit = common.limit_or(50, 200);
    let offset = query.offset.unwrap_or(0);

    if let Some(tt) = &query.traffic_type {
        const KNOWN: [&str; 5] = [
            "paid_confirmed",
            "paid_likely",
            "organic",
            "pixel_only",
            "unknown",
        ];
        if !KNOWN.contains(&tt.as_str()) {
            return Err(crate::errors::EngineError::Validation(format!(
                "unknown traffic_type '{tt}'"
            ))
            .into());
        }
    }

    Ok(Json(state.store.get_traffic_transactions(
        start,
        end,
        sales,
        query.source_id,
        query.traffic_type.as_deref(),
        limit,
        offset,
    )?))
}

// ─── Forecast ────────────────────────────────────────────────────────────────

pub async fn forecast_get(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let sales = query.sales()?;
    Ok(Json(state.forecaster.get_forecast(sales)?))
}

pub async fn forecast_train(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let sales = query.sales()?;
    // Kick off in the background; report immediately.
    let forecaster = state.forecaster.clone();
    let cache = state.cache.clone();
    tokio::spawn(async move {
        let outcome = forecaster.train(sales).await;
        tracing::info!(?outcome, "training run finished");
        cache.clear();
    });
    Ok(Json(json!({"status": "training_started"})))
}

pub async fn forecast_evaluate(
    State(state): State<AppState>,
    Query(query): Query<CommonQuery>,
) -> ApiResult {
    let sales = query.sales()?;
    Ok(Json(state.forecaster.evaluate(sales).await))
}

// ─── Sync ────────────────────────────────────────────────────────────────────

pub async fn sync_trigger(State(state): State<AppState>) -> ApiResult {
    let outcome = state.sync.run_once().await;
    let (status, code) = match outcome {
        CycleOutcome::Completed(applied) => {
            return Ok(Json(json!({"status": "completed", "applied": applied})));
        }
        CycleOutcome::AlreadyRunning => ("already_running", StatusCode::CONFLICT),
        CycleOutcome::Skipped => ("skipped", StatusCode::BAD_GATEWAY),
    };
    Err(ApiError::new(code, status))
}
