//! Direct classification and strategy management

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiResult,
    models::{ClassificationResult, ClassificationStrategy},
    services::ClassifyRequest,
    workflow::ReferenceListing,
    AppState,
};

/// POST /api/classification/classify request
#[derive(Debug, Deserialize)]
pub struct ClassifyBody {
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Caller's own identifier for the item, keys the oracle hint cache
    #[serde(default)]
    pub item_code: Option<String>,
    #[serde(default)]
    pub strategy_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StrategiesQuery {
    #[serde(default)]
    pub client_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceQuery {
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StrategySaved {
    pub id: String,
}

pub async fn classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyBody>,
) -> ApiResult<Json<ClassificationResult>> {
    let request = ClassifyRequest {
        name: body.name,
        category: body.category,
        item_code: body.item_code,
    };
    let result = state
        .pipeline
        .classify_direct(&request, body.strategy_id.as_deref())
        .await;
    Ok(Json(state.track(result).await?))
}

pub async fn list_strategies(
    State(state): State<AppState>,
    Query(query): Query<StrategiesQuery>,
) -> ApiResult<Json<Vec<ClassificationStrategy>>> {
    let result = state.pipeline.list_strategies(query.client_id).await;
    Ok(Json(state.track(result).await?))
}

/// Create when `id` is empty or unknown, update otherwise
pub async fn save_strategy(
    State(state): State<AppState>,
    Json(strategy): Json<ClassificationStrategy>,
) -> ApiResult<Json<StrategySaved>> {
    let result = state.pipeline.create_or_update_strategy(strategy).await;
    let id = state.track(result).await?;
    Ok(Json(StrategySaved { id }))
}

/// GET /api/classification/reference?parent=25.73
pub async fn browse_reference(
    State(state): State<AppState>,
    Query(query): Query<ReferenceQuery>,
) -> ApiResult<Json<ReferenceListing>> {
    let result = state.pipeline.browse_reference(query.parent.as_deref());
    Ok(Json(state.track(result).await?))
}

pub fn classification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/classification/classify", post(classify))
        .route("/api/classification/reference", get(browse_reference))
        .route(
            "/api/classification/strategies",
            get(list_strategies).post(save_strategy),
        )
}
