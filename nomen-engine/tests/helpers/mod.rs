//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use nomen_engine::config::{BatchConfig, EngineConfig, OracleConfig};
use nomen_engine::db::{self, reference};
use nomen_engine::services::oracle::{ChatMessage, ChatTransport, OracleClient, OracleError};
use nomen_engine::services::Classifier;
use nomen_engine::workflow::NormalizationPipeline;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fragment of the KPVED listing in its tab-separated export format
pub const REFERENCE_LISTING: &str = "\
C\tПродукция обрабатывающих производств
25\tИзделия металлические готовые, кроме машин и оборудования
25.7\tИзделия ножевые, инструменты и универсальные скобяные изделия
25.73\tИнструменты
25.73.1\tИнструменты ручные для сельского хозяйства
25.73.11\tЛопаты и заступы
25.73.3\tИнструменты ручные прочие
25.73.30\tИнструменты ручные прочие: молотки, кувалды,
\tключи гаечные
25.9\tИзделия металлические готовые прочие
25.93\tИзделия из проволоки, цепи и пружины
25.93.1\tИзделия из проволоки, цепи и пружины
25.93.11\tБолты, винты, гайки и аналогичные изделия
27\tОборудование электрическое
27.3\tКабели и электромонтажные устройства
27.32\tПровода и кабели электронные и электрические прочие
27.32.1\tПровода и кабели электронные и электрические прочие
27.32.11\tКабели силовые
";

/// In-memory database with the engine tables, reference codes and a few catalog items
pub async fn create_test_db() -> SqlitePool {
    let pool = nomen_common::pool::open_memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();
    reference::insert_entries(&pool, &reference::parse_reference_text(REFERENCE_LISTING))
        .await
        .unwrap();
    seed_catalog(
        &pool,
        &[
            (1, "молотак строительный 500гр", Some("Инструменты / Молотки")),
            (2, "Болт М10х50 оцинк.", Some("Крепеж / Болты")),
            (3, "Кабель ВВГ 3х2.5", None),
        ],
    )
    .await;
    pool
}

pub async fn seed_catalog(pool: &SqlitePool, items: &[(i64, &str, Option<&str>)]) {
    for (id, name, category) in items {
        sqlx::query("INSERT INTO catalog_items (id, name, category) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(category)
            .execute(pool)
            .await
            .unwrap();
    }
}

pub fn oracle_config(workers: usize, max_retries: u32, timeout_ms: u64) -> OracleConfig {
    OracleConfig {
        api_key: Some("test-key".to_string()),
        worker_count: workers,
        max_retries,
        request_timeout: Duration::from_millis(timeout_ms),
        inter_call_delay: Duration::from_millis(1),
        ..OracleConfig::default()
    }
}

pub fn engine_config(oracle: OracleConfig) -> EngineConfig {
    EngineConfig {
        port: 0,
        database_path: PathBuf::from(":memory:"),
        reference_file: None,
        oracle,
        batch: BatchConfig::default(),
    }
}

pub async fn build_pipeline(pool: &SqlitePool, oracle: Option<Arc<OracleClient>>) -> Arc<NormalizationPipeline> {
    let classifier = Classifier::load(pool, oracle.clone()).await.unwrap();
    Arc::new(NormalizationPipeline::new(pool.clone(), Arc::new(classifier), oracle))
}

/// Scripted oracle transport
pub enum Behavior {
    Reply(String),
    Fail(OracleError),
    /// Sleep past any sensible timeout
    Hang,
}

pub struct FakeTransport {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn replying(reply: &str) -> Arc<Self> {
        Self::new(Behavior::Reply(reply.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(reply) => Ok(reply.clone()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(OracleError::Timeout)
            }
        }
    }
}
