// JSON endpoints
// Snapshot, trend, and history reads for dashboards and scripts

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::history::{trends::TrendReport, HistoryStore, SuccessRate};
use crate::model::{now_millis, MeasurementRecord, Snapshot};

const DEFAULT_TREND_HOURS: u32 = 24;
const DEFAULT_BUCKET_MINUTES: u32 = 60;
const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("history store is disabled")]
    HistoryDisabled,

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::HistoryDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn store(context: &AppContext) -> Result<&HistoryStore, ApiError> {
    context.history.as_deref().ok_or(ApiError::HistoryDisabled)
}

/// Latest snapshot, served from cache while fresh
pub async fn snapshot(State(context): State<Arc<AppContext>>) -> Json<Snapshot> {
    Json(context.orchestrator.collect(true).await)
}

/// Force a full collection run
pub async fn collect(State(context): State<Arc<AppContext>>) -> Json<Snapshot> {
    Json(context.orchestrator.collect(false).await)
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    hours: Option<u32>,
    bucket_minutes: Option<u32>,
}

pub async fn trends(
    State(context): State<Arc<AppContext>>,
    Query(params): Query<TrendParams>,
) -> Result<Json<TrendReport>, ApiError> {
    let hours = params.hours.unwrap_or(DEFAULT_TREND_HOURS);
    let bucket_minutes = params.bucket_minutes.unwrap_or(DEFAULT_BUCKET_MINUTES);
    if hours == 0 || bucket_minutes == 0 {
        return Err(ApiError::BadRequest(
            "hours and bucket_minutes must be positive".to_string(),
        ));
    }

    Ok(Json(store(&context)?.query_trends(hours, bucket_minutes).await))
}

pub async fn success_rates(
    State(context): State<Arc<AppContext>>,
) -> Result<Json<Vec<SuccessRate>>, ApiError> {
    Ok(Json(store(&context)?.success_rates().await))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    limit: Option<usize>,
}

/// Most recent records for one measurement name, newest first
pub async fn history(
    State(context): State<Arc<AppContext>>,
    Path(name): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<MeasurementRecord>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(store(&context)?.latest(&name, limit).await))
}

pub async fn health(State(context): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": now_millis(),
        "viewers": context.hub.viewer_count(),
        "connections": context.hub.viewers(),
        "sources": context.orchestrator.source_count(),
        "persistence": context.history.as_ref().map(|store| store.path().display().to_string()),
        "cache": {
            "warm": context.cache.is_warm(),
            "age_ms": context.cache.age().map(|age| age.as_millis() as u64),
            "ttl_secs": context.cache.ttl().as_secs(),
        },
    }))
}
