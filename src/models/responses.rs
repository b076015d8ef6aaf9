//! Response DTOs for the cache gateway API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{ExecutionResult, StatsSnapshot};

/// Response body for GET /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub region: String,
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(region: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            region: region.into(),
            key: key.into(),
            value,
        }
    }
}

/// Response body for PUT /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

impl SetResponse {
    pub fn new(key: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
            expires_at,
        }
    }
}

/// Response body for the mutations that may find nothing to act on
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResponse {
    pub key: String,
    pub result: ExecutionResult,
}

impl ExecutionResponse {
    pub fn new(key: impl Into<String>, result: ExecutionResult) -> Self {
        Self {
            key: key.into(),
            result,
        }
    }
}

/// Response body for region and whole-cache cleans
#[derive(Debug, Clone, Serialize)]
pub struct CleanResponse {
    pub message: String,
}

impl CleanResponse {
    pub fn region(region: &str) -> Self {
        Self {
            message: format!("Region '{}' cleaned", region),
        }
    }

    pub fn all() -> Self {
        Self {
            message: "All regions cleaned".to_string(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub partitions: usize,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(partitions: usize, counters: StatsSnapshot) -> Self {
        let hit_rate = counters.hit_rate();
        Self {
            partitions,
            counters,
            hit_rate,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
