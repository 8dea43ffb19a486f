//! Session-driven normalization endpoints
//!
//! POST /api/normalization/{start, apply-patterns, apply-ai, apply-categorization, revert}
//! GET /api/normalization/history

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    models::{NormalizationSession, NormalizationStage},
    workflow::{AiStageOptions, CategorizationOutcome, SessionHistory, DEFAULT_STRATEGY_ID},
    AppState,
};

/// POST /api/normalization/start request
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub catalog_item_id: i64,
    pub original_name: String,
}

/// Body of the stage endpoints that only need the session
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: i64,
}

/// POST /api/normalization/apply-ai request
#[derive(Debug, Deserialize)]
pub struct ApplyAiRequest {
    pub session_id: i64,
    #[serde(default)]
    pub use_chat: bool,
    #[serde(default)]
    pub context_hints: Vec<String>,
}

/// POST /api/normalization/apply-categorization request
#[derive(Debug, Deserialize)]
pub struct ApplyCategorizationRequest {
    pub session_id: i64,
    /// Defaults to `top_priority`
    #[serde(default)]
    pub strategy_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub session_id: i64,
}

/// POST /api/normalization/revert request
#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub session_id: i64,
    pub target_stage_id: i64,
}

pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<NormalizationSession>)> {
    let result = state
        .pipeline
        .start_session(request.catalog_item_id, &request.original_name)
        .await;
    let session = state.track(result).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn apply_patterns(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<Json<NormalizationStage>> {
    let result = state.pipeline.apply_pattern_stage(request.session_id).await;
    Ok(Json(state.track(result).await?))
}

/// A failed oracle call still answers 200 with a `failed` stage
pub async fn apply_ai(
    State(state): State<AppState>,
    Json(request): Json<ApplyAiRequest>,
) -> ApiResult<Json<NormalizationStage>> {
    let options = AiStageOptions {
        use_chat: request.use_chat,
        context_hints: request.context_hints,
    };
    let result = state.pipeline.apply_ai_stage(request.session_id, &options).await;
    Ok(Json(state.track(result).await?))
}

pub async fn apply_categorization(
    State(state): State<AppState>,
    Json(request): Json<ApplyCategorizationRequest>,
) -> ApiResult<Json<CategorizationOutcome>> {
    let strategy_id = request.strategy_id.as_deref().unwrap_or(DEFAULT_STRATEGY_ID);
    let result = state
        .pipeline
        .apply_categorization_stage(request.session_id, strategy_id)
        .await;
    Ok(Json(state.track(result).await?))
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<SessionHistory>> {
    let result = state.pipeline.get_history(query.session_id).await;
    Ok(Json(state.track(result).await?))
}

pub async fn revert(
    State(state): State<AppState>,
    Json(request): Json<RevertRequest>,
) -> ApiResult<Json<NormalizationSession>> {
    let result = state
        .pipeline
        .revert_stage(request.session_id, request.target_stage_id)
        .await;
    Ok(Json(state.track(result).await?))
}

pub fn normalization_routes() -> Router<AppState> {
    Router::new()
        .route("/api/normalization/start", post(start_session))
        .route("/api/normalization/apply-patterns", post(apply_patterns))
        .route("/api/normalization/apply-ai", post(apply_ai))
        .route("/api/normalization/apply-categorization", post(apply_categorization))
        .route("/api/normalization/history", get(get_history))
        .route("/api/normalization/revert", post(revert))
}
