//! Route table.

use super::{handlers, AppState};
use crate::ws;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/summary", get(handlers::summary))
        .route("/api/revenue/trend", get(handlers::revenue_trend))
        .route("/api/revenue/forecast", get(handlers::forecast_get))
        .route("/api/revenue/forecast/train", post(handlers::forecast_train))
        .route(
            "/api/revenue/forecast/evaluate",
            get(handlers::forecast_evaluate),
        )
        .route("/api/sales/by-source", get(handlers::sales_by_source))
        .route("/api/returns", get(handlers::returns_list))
        .route("/api/products/top", get(handlers::products_top))
        .route(
            "/api/products/performance",
            get(handlers::products_performance),
        )
        .route("/api/brands", get(handlers::brand_analytics))
        .route("/api/filters/categories", get(handlers::filter_categories))
        .route(
            "/api/filters/categories/children",
            get(handlers::filter_child_categories),
        )
        .route("/api/filters/brands", get(handlers::filter_brands))
        .route("/api/customers/insights", get(handlers::customers_insights))
        .route("/api/customers/cohorts", get(handlers::customers_cohorts))
        .route(
            "/api/customers/second-purchase",
            get(handlers::customers_second_purchase),
        )
        .route("/api/customers/ltv", get(handlers::customers_ltv))
        .route("/api/customers/at-risk", get(handlers::customers_at_risk))
        .route("/api/stocks/summary", get(handlers::stocks_summary))
        .route("/api/stocks/analysis", get(handlers::stocks_analysis))
        .route("/api/stocks/actions", get(handlers::stocks_actions))
        .route("/api/stocks/trend", get(handlers::stocks_trend))
        .route("/api/stocks/average", get(handlers::stocks_average))
        .route("/api/expenses/import", post(handlers::expenses_import))
        .route(
            "/api/goals",
            get(handlers::goals_get)
                .post(handlers::goals_post)
                .delete(handlers::goals_delete),
        )
        .route("/api/goals/progress", get(handlers::goals_progress))
        .route("/api/traffic/analytics", get(handlers::traffic_analytics))
        .route("/api/traffic/trend", get(handlers::traffic_trend))
        .route(
            "/api/traffic/transactions",
            get(handlers::traffic_transactions),
        )
        .route("/api/sync/trigger", post(handlers::sync_trigger))
        .route("/ws/dashboard", get(ws::dashboard_ws_handler))
        .with_state(state)
}
