//! Background batch normalization of unprocessed catalog items
//!
//! One run at a time. Items are fanned out to `worker_count` concurrent
//! workers; cancellation is checked before each item starts, so items
//! already in flight finish normally.

pub mod statistics;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use nomen_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::db::{catalog, sessions};
use crate::models::{CatalogItem, SessionStatus, StageStatus};
use crate::workflow::{AiStageOptions, NormalizationPipeline};

pub use statistics::{BatchLog, BatchStats, LogEntry, LogLevel, LOG_CAPACITY};

/// Progress is logged after this many items
const PROGRESS_EVERY: usize = 10;
const STATUS_LOG_ENTRIES: usize = 50;

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub stats: BatchStats,
    pub display: String,
    pub recent_log: Vec<LogEntry>,
}

#[derive(Debug)]
enum ItemOutcome {
    Completed,
    Failed(String),
    Skipped,
}

struct Shared {
    stats: Mutex<BatchStats>,
    log: Mutex<BatchLog>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    db: SqlitePool,
    pipeline: Arc<NormalizationPipeline>,
    config: BatchConfig,
    worker_count: usize,
    shared: Arc<Shared>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl BatchOrchestrator {
    pub fn new(
        db: SqlitePool,
        pipeline: Arc<NormalizationPipeline>,
        config: BatchConfig,
        worker_count: usize,
    ) -> Self {
        Self {
            db,
            pipeline,
            config,
            worker_count: worker_count.max(1),
            shared: Arc::new(Shared {
                stats: Mutex::new(BatchStats::default()),
                log: Mutex::new(BatchLog::default()),
                cancel: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Start a run over up to `limit` (default: batch size) unprocessed items
    pub async fn start(&self, limit: Option<usize>) -> Result<BatchStats> {
        {
            let mut stats = locked(&self.shared.stats);
            if stats.running {
                return Err(Error::Conflict("a batch run is already active".to_string()));
            }
            stats.begin(Utc::now());
        }

        let limit = limit.filter(|l| *l > 0).unwrap_or(self.config.batch_size);
        let items = match catalog::list_unprocessed_items(&self.db, limit).await {
            Ok(items) => items,
            Err(e) => {
                locked(&self.shared.stats).finish(Utc::now());
                self.log(LogLevel::Error, format!("Failed to load items: {}", e));
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        *locked(&self.shared.cancel) = Some(token.clone());

        let snapshot = {
            let mut stats = locked(&self.shared.stats);
            stats.total = items.len();
            stats.clone()
        };
        self.log(
            LogLevel::Info,
            format!(
                "Batch started: {} items, {} workers, strategy {}",
                items.len(),
                self.worker_count,
                self.config.strategy_id
            ),
        );
        tracing::info!(
            items = items.len(),
            workers = self.worker_count,
            "Batch run started"
        );

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(items, token).await });
        *locked(&self.shared.handle) = Some(handle);

        Ok(snapshot)
    }

    /// Request cancellation; returns false when nothing is running
    pub fn stop(&self) -> bool {
        let running = locked(&self.shared.stats).running;
        let token = locked(&self.shared.cancel).clone();
        match token {
            Some(token) if running => {
                token.cancel();
                self.log(LogLevel::Warn, "Batch stop requested");
                tracing::info!("Batch run cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> BatchStats {
        locked(&self.shared.stats).clone()
    }

    pub fn status(&self) -> BatchStatus {
        let stats = self.stats();
        BatchStatus {
            display: stats.display_string(),
            stats,
            recent_log: locked(&self.shared.log).recent(STATUS_LOG_ENTRIES),
        }
    }

    /// Wait for the current run, if any, to finish
    pub async fn join(&self) {
        let handle = locked(&self.shared.handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Batch task panicked");
            }
        }
    }

    /// Stop pulling new items and wait for in-flight ones to finish
    pub async fn shutdown(&self) {
        if self.stop() {
            tracing::info!("Waiting for in-flight batch items");
        }
        self.join().await;
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        locked(&self.shared.log).push(level, message);
    }

    async fn run(&self, items: Vec<CatalogItem>, token: CancellationToken) {
        let mut outcomes = stream::iter(items)
            .map(|item| {
                let token = token.clone();
                async move {
                    if token.is_cancelled() {
                        return (item.id, ItemOutcome::Skipped);
                    }
                    let outcome = match self.process_item(&item).await {
                        Ok(()) => ItemOutcome::Completed,
                        Err(e) => ItemOutcome::Failed(e.to_string()),
                    };
                    (item.id, outcome)
                }
            })
            .buffer_unordered(self.worker_count);

        let mut skipped = 0usize;
        while let Some((item_id, outcome)) = outcomes.next().await {
            let processed = {
                let mut stats = locked(&self.shared.stats);
                match &outcome {
                    ItemOutcome::Completed => stats.record(true),
                    ItemOutcome::Failed(_) => stats.record(false),
                    ItemOutcome::Skipped => {}
                }
                stats.processed
            };

            match outcome {
                ItemOutcome::Failed(message) => {
                    tracing::warn!(item_id, error = %message, "Batch item failed");
                    self.log(LogLevel::Error, format!("Item {} failed: {}", item_id, message));
                }
                ItemOutcome::Skipped => {
                    skipped += 1;
                    continue;
                }
                ItemOutcome::Completed => {}
            }

            if processed % PROGRESS_EVERY == 0 {
                let display = self.stats().display_string();
                tracing::info!(processed, "Batch progress");
                self.log(LogLevel::Info, display);
            }
        }

        // Token is cleared under the stats lock, before a later start() can install its own
        let summary = {
            let mut stats = locked(&self.shared.stats);
            stats.finish(Utc::now());
            *locked(&self.shared.cancel) = None;
            stats.display_string()
        };

        if token.is_cancelled() {
            tracing::info!(skipped, "Batch run stopped");
            self.log(LogLevel::Warn, format!("Batch stopped, {} items skipped: {}", skipped, summary));
        } else {
            tracing::info!(summary = %summary, "Batch run finished");
            self.log(LogLevel::Info, format!("Batch finished: {}", summary));
        }
    }

    /// Pattern, AI when enabled, then categorization; completes the session.
    /// Any failure after the session is obtained marks it `failed`.
    async fn process_item(&self, item: &CatalogItem) -> Result<()> {
        let session_id = match sessions::find_latest_session_for_item(&self.db, item.id).await? {
            Some(session) if session.status != SessionStatus::Completed => {
                tracing::debug!(session_id = session.id, item_id = item.id, "Reusing session");
                session.id
            }
            _ => self.pipeline.start_session(item.id, &item.name).await?.id,
        };

        if let Err(e) = self.run_stages(session_id, item).await {
            if let Err(mark_err) = self.pipeline.set_status(session_id, SessionStatus::Failed).await {
                tracing::error!(session_id, error = %mark_err, "Could not mark session failed");
            }
            return Err(e);
        }

        self.pipeline.set_status(session_id, SessionStatus::Completed).await?;
        Ok(())
    }

    async fn run_stages(&self, session_id: i64, item: &CatalogItem) -> Result<()> {
        self.pipeline.apply_pattern_stage(session_id).await?;

        if self.pipeline.ai_enabled() {
            let options = AiStageOptions {
                use_chat: false,
                context_hints: item.category.iter().cloned().collect(),
            };
            let stage = self.pipeline.apply_ai_stage(session_id, &options).await?;
            if stage.status == StageStatus::Failed {
                return Err(Error::ExternalService(
                    stage
                        .error_message
                        .unwrap_or_else(|| "AI stage failed".to_string()),
                ));
            }
        }

        self.pipeline
            .apply_categorization_stage(session_id, &self.config.strategy_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reference;
    use crate::services::classifier::Classifier;
    use crate::services::oracle::tests::{test_config, MockTransport};
    use crate::services::oracle::{OracleClient, OracleError};
    use crate::services::reference_tree::tests::sample_entries;

    async fn setup(items: &[(i64, &str)], oracle: Option<Arc<OracleClient>>, workers: usize) -> BatchOrchestrator {
        let pool = nomen_common::pool::open_memory_pool().await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        reference::insert_entries(&pool, &sample_entries()).await.unwrap();
        for (id, name) in items {
            sqlx::query("INSERT INTO catalog_items (id, name, category) VALUES (?, ?, NULL)")
                .bind(id)
                .bind(name)
                .execute(&pool)
                .await
                .unwrap();
        }

        let classifier = Arc::new(Classifier::load(&pool, oracle.clone()).await.unwrap());
        let pipeline = Arc::new(NormalizationPipeline::new(pool.clone(), classifier, oracle));
        BatchOrchestrator::new(pool, pipeline, BatchConfig::default(), workers)
    }

    #[tokio::test]
    async fn test_batch_completes_items() {
        let orchestrator = setup(&[(1, "БОЛТ М10"), (2, "молотак 500гр"), (3, "кабел ВВГ")], None, 2).await;

        let started = orchestrator.start(None).await.unwrap();
        assert_eq!(started.total, 3);
        orchestrator.join().await;

        let stats = orchestrator.stats();
        assert!(!stats.running);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.failed, 0);

        let remaining = catalog::list_unprocessed_items(&orchestrator.db, 10).await.unwrap();
        assert!(remaining.is_empty());
        let status = orchestrator.status();
        assert!(status.recent_log.iter().any(|e| e.message.starts_with("Batch finished")));
    }

    #[tokio::test]
    async fn test_second_start_conflicts_while_running() {
        let transport = MockTransport::replying(r#"{"normalized_name": "болт м10", "confidence": 0.9}"#)
            .with_latency(std::time::Duration::from_millis(100));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), Arc::new(transport)));
        let orchestrator = setup(&[(1, "болт м10")], Some(oracle), 1).await;

        orchestrator.start(None).await.unwrap();
        let second = orchestrator.start(None).await;
        assert!(matches!(second, Err(Error::Conflict(_))));
        orchestrator.join().await;
    }

    #[tokio::test]
    async fn test_ai_failure_marks_session_failed() {
        let transport = MockTransport::failing(OracleError::Api(500, "down".into()));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), Arc::new(transport)));
        let orchestrator = setup(&[(1, "болт м10")], Some(oracle), 1).await;

        orchestrator.start(None).await.unwrap();
        orchestrator.join().await;

        let stats = orchestrator.stats();
        assert_eq!(stats.failed, 1);
        let session = sessions::find_latest_session_for_item(&orchestrator.db, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_session_is_reused_on_next_run() {
        let orchestrator = setup(&[(1, "болт м10")], None, 1).await;
        let session = orchestrator.pipeline.start_session(1, "болт м10").await.unwrap();
        orchestrator
            .pipeline
            .set_status(session.id, SessionStatus::Failed)
            .await
            .unwrap();

        orchestrator.start(None).await.unwrap();
        orchestrator.join().await;

        let latest = sessions::find_latest_session_for_item(&orchestrator.db, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, session.id);
        assert_eq!(latest.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_items() {
        let transport = MockTransport::replying(r#"{"normalized_name": "болт м10", "confidence": 0.9}"#)
            .with_latency(std::time::Duration::from_millis(50));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), Arc::new(transport)));
        let items: Vec<(i64, String)> = (1..=20).map(|i| (i, format!("болт м{}", i))).collect();
        let item_refs: Vec<(i64, &str)> = items.iter().map(|(i, n)| (*i, n.as_str())).collect();
        let orchestrator = setup(&item_refs, Some(oracle), 1).await;

        orchestrator.start(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(orchestrator.stop());
        orchestrator.join().await;

        let stats = orchestrator.stats();
        assert!(!stats.running);
        assert!(stats.processed < 20);
        assert!(!orchestrator.stop());
    }

    #[tokio::test]
    async fn test_store_error_marks_session_failed() {
        let orchestrator = setup(&[(1, "болт м10")], None, 1).await;
        sqlx::query("DROP TABLE normalization_stages")
            .execute(&orchestrator.db)
            .await
            .unwrap();

        orchestrator.start(None).await.unwrap();
        orchestrator.join().await;

        let stats = orchestrator.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.successful, 0);
        let session = sessions::find_latest_session_for_item(&orchestrator.db, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_next_run_can_be_stopped_after_previous_finished() {
        let transport = MockTransport::replying(r#"{"normalized_name": "болт м10", "confidence": 0.9}"#)
            .with_latency(std::time::Duration::from_millis(50));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), Arc::new(transport)));
        let items: Vec<(i64, String)> = (1..=10).map(|i| (i, format!("болт м{}", i))).collect();
        let item_refs: Vec<(i64, &str)> = items.iter().map(|(i, n)| (*i, n.as_str())).collect();
        let orchestrator = setup(&item_refs, Some(oracle), 1).await;

        orchestrator.start(Some(1)).await.unwrap();
        orchestrator.join().await;
        assert!(!orchestrator.stop());

        orchestrator.start(None).await.unwrap();
        assert!(orchestrator.stop());
        orchestrator.join().await;
        assert!(!orchestrator.stats().running);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_items() {
        let transport = MockTransport::replying(r#"{"normalized_name": "болт м10", "confidence": 0.9}"#)
            .with_latency(std::time::Duration::from_millis(50));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), Arc::new(transport)));
        let items: Vec<(i64, String)> = (1..=20).map(|i| (i, format!("болт м{}", i))).collect();
        let item_refs: Vec<(i64, &str)> = items.iter().map(|(i, n)| (*i, n.as_str())).collect();
        let orchestrator = setup(&item_refs, Some(oracle), 2).await;

        orchestrator.start(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        orchestrator.shutdown().await;

        let stats = orchestrator.stats();
        assert!(!stats.running);
        assert!(stats.processed < 20);
        let in_progress: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM normalization_sessions WHERE status = 'in_progress'")
                .fetch_one(&orchestrator.db)
                .await
                .unwrap();
        assert_eq!(in_progress, 0);

        // Idle shutdown is a no-op
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_limit_caps_items() {
        let orchestrator = setup(&[(1, "болт"), (2, "гайка"), (3, "винт")], None, 2).await;
        let started = orchestrator.start(Some(2)).await.unwrap();
        assert_eq!(started.total, 2);
        orchestrator.join().await;
        assert_eq!(orchestrator.stats().processed, 2);
    }
}
