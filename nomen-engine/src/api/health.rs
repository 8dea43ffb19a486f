//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::services::oracle::{BreakerState, OracleStatsSnapshot};
use crate::AppState;

/// Oracle diagnostics, present only when AI stages are enabled
#[derive(Debug, Serialize)]
pub struct OracleHealth {
    pub model: String,
    pub workers: usize,
    pub breaker: BreakerState,
    pub stats: OracleStatsSnapshot,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded" while the oracle circuit is open
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub uptime_seconds: u64,
    pub ai_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle: Option<OracleHealth>,
    /// Last server-side error, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    let oracle = state.pipeline.oracle().map(|client| OracleHealth {
        model: state.config.oracle.model.clone(),
        workers: client.worker_count(),
        breaker: client.breaker_state(),
        stats: client.stats(),
    });
    let status = match &oracle {
        Some(o) if o.breaker == BreakerState::Open => "degraded",
        _ => "ok",
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "nomen-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds,
        ai_enabled: state.pipeline.ai_enabled(),
        oracle,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
