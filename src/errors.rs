//! Error taxonomy for the ingestion and query paths.
//!
//! Recovery policy per variant:
//! - `Upstream` / `RateLimited`: retried with backoff by the sync engine,
//!   then the cycle is skipped.
//! - `DataIntegrity`: the offending row is dropped, the batch continues.
//! - `StoreWrite`: transaction rolled back, cycle aborted.
//! - `StoreSchema`: fatal at startup.
//! - `ForecasterNotReady`: surfaces as `{status: "unavailable"}`.
//! - `Validation`: HTTP 400.
//! - `Timeout`: HTTP 504.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("store write failed: {0}")]
    StoreWrite(#[from] rusqlite::Error),

    #[error("store schema init failed: {0}")]
    StoreSchema(String),

    #[error("forecaster not ready")]
    ForecasterNotReady,

    #[error("{0}")]
    Validation(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::ForecasterNotReady => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Upstream(_) | EngineError::RateLimited { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the sync engine should retry the current attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Upstream(_) | EngineError::RateLimited { .. } | EngineError::Timeout(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
