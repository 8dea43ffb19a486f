//! Batch normalization control
//!
//! POST /api/batch/start, POST /api/batch/stop, GET /api/batch/status

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiResult,
    services::{BatchStats, BatchStatus},
    AppState,
};

/// Optional body of POST /api/batch/start
#[derive(Debug, Default, Deserialize)]
pub struct StartBatchRequest {
    /// Overrides the configured batch size for this run
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StopBatchResponse {
    /// False when no run was active
    pub stopped: bool,
}

/// Returns 202 Accepted; the run continues in the background
pub async fn start_batch(
    State(state): State<AppState>,
    body: Option<Json<StartBatchRequest>>,
) -> ApiResult<(StatusCode, Json<BatchStats>)> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let result = state.orchestrator.start(request.limit).await;
    let stats = state.track(result).await?;
    Ok((StatusCode::ACCEPTED, Json(stats)))
}

pub async fn stop_batch(State(state): State<AppState>) -> Json<StopBatchResponse> {
    Json(StopBatchResponse {
        stopped: state.orchestrator.stop(),
    })
}

pub async fn batch_status(State(state): State<AppState>) -> Json<BatchStatus> {
    Json(state.orchestrator.status())
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/api/batch/start", post(start_batch))
        .route("/api/batch/stop", post(stop_batch))
        .route("/api/batch/status", get(batch_status))
}
