//! HTTP boundary: shared state, error mapping, route table.

pub mod handlers;
pub mod params;
pub mod routes;

use crate::cache::QueryCache;
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::forecast::Forecaster;
use crate::store::AnalyticsStore;
use crate::sync::SyncEngine;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Dependency graph shared by every handler, assembled once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AnalyticsStore>,
    pub bus: Arc<EventBus>,
    pub sync: Arc<SyncEngine>,
    pub forecaster: Arc<Forecaster>,
    pub cache: Arc<QueryCache>,
    pub started_at: Instant,
}

/// JSON error payload with the taxonomy's status mapping.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self {
            status: e.status_code(),
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<EngineError>() {
            Ok(engine) => engine.into(),
            Err(other) => {
                tracing::error!(error = %other, "handler failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}
