//! nomen-engine - catalog name normalization service
//!
//! Serves the staged normalization pipeline, direct classification and
//! batch control over HTTP (default port 5741).

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::prelude::*;

use nomen_engine::config::{CliArgs, EngineConfig};
use nomen_engine::db;
use nomen_engine::services::{BatchOrchestrator, Classifier, OracleClient};
use nomen_engine::workflow::NormalizationPipeline;
use nomen_engine::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let config = EngineConfig::resolve(&args).context("Invalid configuration")?;

    info!("Starting nomen-engine v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build: {} ({}, {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Database: {}", config.database_path.display());

    let pool = db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;

    if let Some(path) = &config.reference_file {
        let entries = db::reference::parse_reference_file(path)
            .with_context(|| format!("Failed to read reference file {}", path.display()))?;
        let inserted = db::reference::insert_entries(&pool, &entries).await?;
        info!(parsed = entries.len(), inserted, "Reference classifier imported");
    }

    let oracle = OracleClient::from_config(&config.oracle)?.map(Arc::new);
    let classifier = Classifier::load(&pool, oracle.clone())
        .await
        .context("Failed to load reference classifier")?;
    if classifier.tree().is_empty() {
        tracing::warn!("Reference classifier is empty, categorization will rely on the oracle");
    }

    let pipeline = Arc::new(NormalizationPipeline::new(
        pool.clone(),
        Arc::new(classifier),
        oracle,
    ));
    info!(ai_enabled = pipeline.ai_enabled(), "Normalization pipeline ready");

    let port = config.port;
    let state = AppState::new(pool, pipeline, config);
    let orchestrator = state.orchestrator.clone();
    let app = nomen_engine::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator.clone()))
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, after asking a running batch to stop
async fn shutdown_signal(orchestrator: BatchOrchestrator) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }

    orchestrator.stop();
}
