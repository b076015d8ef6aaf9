//! API Handlers
//!
//! HTTP request handlers for each gateway endpoint. Every handler forwards
//! to the partition router; values travel as JSON.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::cache::{ExecutionResult, RegionName};
use crate::config::Config;
use crate::error::Result;
use crate::models::{
    CleanResponse, ErrorResponse, ExecutionResponse, GetResponse, HealthResponse, RegionQuery,
    SetRequest, SetResponse, StatsResponse, UpdatePolicyRequest,
};
use crate::router::{LocalCluster, PartitionRouter};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<PartitionRouter>,
    /// Partitions hosted by this node
    pub cluster: Arc<LocalCluster>,
}

impl AppState {
    pub fn new(router: PartitionRouter, cluster: Arc<LocalCluster>) -> Self {
        Self {
            router: Arc::new(router),
            cluster,
        }
    }

    /// Starts the configured partitions and a router over them.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cluster = Arc::new(
            LocalCluster::start(
                config.service_name.clone(),
                config.partition_count,
                config.engine_config(),
            )
            .await?,
        );
        let router =
            PartitionRouter::connect(config.service_name.clone(), cluster.clone(), cluster.clone())
                .await?;
        Ok(Self::new(router, cluster))
    }
}

/// Handler for GET /cache/:key?region=
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<RegionQuery>,
) -> Result<Response> {
    let region = RegionName::parse(query.region.as_deref())?;
    match state.router.try_get(query.region.as_deref(), &key).await? {
        Some(bytes) => {
            let value: Value = serde_json::from_slice(&bytes)?;
            Ok(Json(GetResponse::new(region.to_string(), key, value)).into_response())
        }
        None => Ok(not_found(&key)),
    }
}

/// Handler for PUT /cache/:key
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let policy = req.policy()?;
    let bytes = serde_json::to_vec(&req.value)?;
    state
        .router
        .set_or_update(req.region.as_deref(), &key, bytes, policy)
        .await?;

    Ok(Json(SetResponse::new(key, policy.absolute_expiration)))
}

/// Handler for PUT /cache/:key/policy
pub async fn update_policy_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<UpdatePolicyRequest>,
) -> Result<Response> {
    let policy = req.policy()?;
    let result = state
        .router
        .try_update_policy(req.region.as_deref(), &key, policy)
        .await?;

    let status = match result {
        ExecutionResult::Done => StatusCode::OK,
        ExecutionResult::NotFound => StatusCode::NOT_FOUND,
    };
    Ok((status, Json(ExecutionResponse::new(key, result))).into_response())
}

/// Handler for DELETE /cache/:key?region=
///
/// Deleting a missing key succeeds with `not_found`.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<RegionQuery>,
) -> Result<Json<ExecutionResponse>> {
    let result = state
        .router
        .try_delete(query.region.as_deref(), &key)
        .await?;

    Ok(Json(ExecutionResponse::new(key, result)))
}

/// Handler for DELETE /regions/:region
pub async fn clean_region_handler(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Result<Json<CleanResponse>> {
    state.router.clean_region_everywhere(&region).await?;
    Ok(Json(CleanResponse::region(&region)))
}

/// Handler for DELETE /cache
pub async fn clean_all_handler(State(state): State<AppState>) -> Result<Json<CleanResponse>> {
    state.router.clean_all().await?;
    Ok(Json(CleanResponse::all()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.cluster.partition_count(),
        state.cluster.stats(),
    ))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

fn not_found(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("Key '{}' not found", key))),
    )
        .into_response()
}
