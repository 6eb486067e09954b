//! Sales-analytics backend: CRM ingestion, embedded analytical store,
//! dashboard API with live WebSocket updates and revenue forecasting.

use anyhow::{Context, Result};
use salespulse_backend::{
    api::{routes, AppState},
    cache::QueryCache,
    config,
    events::EventBus,
    forecast::Forecaster,
    scheduler,
    store::AnalyticsStore,
    sync::{upstream::KeyCrmClient, SyncEngine},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "salespulse_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    init_tracing();

    info!("sales analytics engine starting");

    // Store first: schema failures are fatal, refuse to serve.
    let db_path = config::db_path();
    let store = Arc::new(
        AnalyticsStore::new(&db_path)
            .map_err(|e| anyhow::anyhow!("store init failed: {e}"))?,
    );

    let api_key = config::api_key()?;
    let client = KeyCrmClient::new(api_key).context("upstream client init failed")?;

    let bus = Arc::new(EventBus::new());
    let cache = Arc::new(QueryCache::new(config::QUERY_CACHE_TTL_SECS));
    let sync = Arc::new(SyncEngine::new(
        store.clone(),
        client,
        bus.clone(),
        cache.clone(),
    ));
    let forecaster = Arc::new(Forecaster::new(store.clone(), config::model_dir()));

    let state = AppState {
        store,
        bus,
        sync,
        forecaster,
        cache,
        started_at: Instant::now(),
    };

    scheduler::spawn_all(state.clone());

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config::listen_port());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "api server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
