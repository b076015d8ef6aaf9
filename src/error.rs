//! Error types for the region cache
//!
//! Provides unified error handling using thiserror. A missing key is not an
//! error: mutating operations report it through `ExecutionResult::NotFound`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine, store and router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Blank or reserved region passed where a concrete region is required
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The transactional store rejected or could not serve the request
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Optimistic validation failed at commit time
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// No live partition owns the computed hash (stale topology)
    #[error("Routing failure: {0}")]
    RoutingFailure(String),

    /// A value or policy could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// True for failures that a fresh transaction may succeed on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::TransactionConflict(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CacheError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::TransactionConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::RoutingFailure(_) => StatusCode::BAD_GATEWAY,
            CacheError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the region cache.
pub type Result<T> = std::result::Result<T, CacheError>;
