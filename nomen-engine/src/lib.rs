//! Nomen engine: staged normalization and classification of catalog item names
//!
//! Library interface shared by the binary and the integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::EngineConfig;
use crate::services::BatchOrchestrator;
use crate::workflow::NormalizationPipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub pipeline: Arc<NormalizationPipeline>,
    pub orchestrator: BatchOrchestrator,
    pub config: Arc<EngineConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, pipeline: Arc<NormalizationPipeline>, config: EngineConfig) -> Self {
        let orchestrator = BatchOrchestrator::new(
            db.clone(),
            Arc::clone(&pipeline),
            config.batch.clone(),
            config.oracle.worker_count,
        );
        Self {
            db,
            pipeline,
            orchestrator,
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Convert a core result for a handler, remembering 5xx failures
    pub async fn track<T>(&self, result: nomen_common::Result<T>) -> ApiResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = ApiError::from(err);
                if err.status().is_server_error() {
                    tracing::warn!(error = %err, "Request failed");
                    *self.last_error.write().await = Some(err.to_string());
                }
                Err(err)
            }
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::normalization_routes())
        .merge(api::classification_routes())
        .merge(api::batch_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}
