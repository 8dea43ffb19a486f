//! External text oracle client
//!
//! Every call goes through the same path: circuit breaker check, a worker
//! slot (hard concurrency ceiling), per-slot pacing before each attempt,
//! a per-attempt timeout, and the retry policy. Exhausted or permanent
//! failures surface as `Error::ExternalService`.
//!
//! Successful corrections (outside chat mode) and classification hints are
//! kept in bounded reply caches.

pub mod cache;
pub mod circuit_breaker;
pub mod pacing;
pub mod reply;
pub mod retry;
pub mod transport;

use nomen_common::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::OracleConfig;

pub use cache::{CacheStats, ReplyCache};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use pacing::{RateLimiter, WorkerSlots};
pub use reply::{CodeHint, Correction};
pub use retry::{RetryFailure, RetryPolicy};
pub use transport::{ChatMessage, ChatTransport, HttpChatTransport, OracleError};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

const CORRECTION_PROMPT: &str = "Ты эксперт по нормализации наименований товаров. \
Исправь опечатки, приведи единицы измерения к стандартному виду, убери служебные коды и артикулы. \
Ответь только JSON-объектом: {\"normalized_name\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}";

const CLASSIFY_PROMPT: &str = "Ты эксперт по классификатору продукции КПВЭД. \
Выбери наиболее подходящий код для товара. \
Ответь только JSON-объектом: {\"code\": \"NN.NN.NN\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}";

/// Previous AI exchange replayed in chat mode
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct ChatTurn {
    pub input: String,
    pub output: String,
    pub confidence: f64,
}

type CorrectionKey = (String, Vec<String>);
/// Normalized name, category and item code
type HintKey = (String, String, String);

/// Input for a classification hint
#[derive(Debug, Clone, Default)]
pub struct HintRequest {
    pub name: String,
    pub category: String,
    pub item_code: Option<String>,
    /// `(code, name)` pairs the deterministic pass considered
    pub candidates: Vec<(String, String)>,
}

impl HintRequest {
    fn cache_key(&self) -> HintKey {
        (
            self.name.trim().to_lowercase(),
            self.category.trim().to_lowercase(),
            self.item_code.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OracleStatsSnapshot {
    pub calls: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub correction_cache: CacheStats,
    pub hint_cache: CacheStats,
}

#[derive(Debug, Default)]
struct OracleStats {
    calls: AtomicU64,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl OracleStats {
    fn snapshot(&self, correction_cache: CacheStats, hint_cache: CacheStats) -> OracleStatsSnapshot {
        OracleStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            correction_cache,
            hint_cache,
        }
    }
}

pub struct OracleClient {
    transport: Arc<dyn ChatTransport>,
    retry: RetryPolicy,
    slots: WorkerSlots,
    request_timeout: Duration,
    breaker: CircuitBreaker,
    stats: OracleStats,
    corrections: ReplyCache<CorrectionKey, Correction>,
    hints: ReplyCache<HintKey, CodeHint>,
}

impl OracleClient {
    pub fn new(config: &OracleConfig, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy {
                max_attempts: config.max_retries.max(1),
                delay: config.inter_call_delay,
                backoff_multiplier: config.retry_backoff_multiplier,
                max_delay: MAX_RETRY_DELAY,
                jitter: config.retry_jitter,
            },
            slots: WorkerSlots::new(config.worker_count, config.inter_call_delay),
            request_timeout: config.request_timeout,
            breaker: CircuitBreaker::default(),
            stats: OracleStats::default(),
            corrections: ReplyCache::new(config.cache_ttl, config.cache_max_entries),
            hints: ReplyCache::new(config.cache_ttl, config.cache_max_entries),
        }
    }

    /// HTTP-backed client; `None` when no API key is configured
    pub fn from_config(config: &OracleConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone().filter(|_| config.ai_enabled()) else {
            tracing::info!("No oracle API key configured, AI stages disabled");
            return Ok(None);
        };

        let transport = HttpChatTransport::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            config.request_timeout,
        )
        .map_err(|e| Error::Config(format!("oracle client: {}", e)))?;

        tracing::info!(
            model = %config.model,
            workers = config.worker_count,
            max_retries = config.max_retries,
            "Oracle client initialized"
        );
        Ok(Some(Self::new(config, Arc::new(transport))))
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn stats(&self) -> OracleStatsSnapshot {
        self.stats.snapshot(self.corrections.stats(), self.hints.stats())
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn worker_count(&self) -> usize {
        self.slots.capacity()
    }

    /// Ask for a corrected name; `history` replays earlier exchanges in chat mode
    pub async fn correct(&self, name: &str, hints: &[String], history: &[ChatTurn]) -> Result<Correction> {
        let key = history.is_empty().then(|| (name.trim().to_lowercase(), hints.to_vec()));
        if let Some(hit) = key.as_ref().and_then(|k| self.corrections.get(k)) {
            tracing::debug!(name, "Correction served from cache");
            return Ok(hit);
        }

        let mut messages = vec![ChatMessage::system(CORRECTION_PROMPT)];
        for turn in history {
            messages.push(ChatMessage::user(format!("Наименование: \"{}\"", turn.input)));
            messages.push(ChatMessage::assistant(format!(
                "{{\"normalized_name\": {}, \"confidence\": {}}}",
                serde_json::Value::String(turn.output.clone()),
                turn.confidence
            )));
        }

        let mut prompt = format!("Наименование: \"{}\"", name);
        if !hints.is_empty() {
            prompt.push_str("\nКонтекст: ");
            prompt.push_str(&hints.join("; "));
        }
        messages.push(ChatMessage::user(prompt));

        let content = self.call("correct", messages).await?;
        let correction = reply::parse_correction(&content).map_err(|e| oracle_failure("correct", 1, e))?;
        if let Some(key) = key {
            self.corrections.insert(key, correction.clone());
        }
        Ok(correction)
    }

    /// Hint from an earlier successful [`classify_hint`](Self::classify_hint) for the same item
    pub fn cached_hint(&self, request: &HintRequest) -> Option<CodeHint> {
        self.hints.get(&request.cache_key())
    }

    /// Always calls the oracle; the reply is cached for [`cached_hint`](Self::cached_hint)
    pub async fn classify_hint(&self, request: &HintRequest) -> Result<CodeHint> {
        let mut prompt = format!("Товар: \"{}\"", request.name);
        if !request.category.is_empty() {
            prompt.push_str(&format!("\nКатегория: {}", request.category));
        }
        if let Some(code) = &request.item_code {
            prompt.push_str(&format!("\nКод номенклатуры: {}", code));
        }
        if !request.candidates.is_empty() {
            prompt.push_str("\nВозможные коды:");
            for (code, name) in &request.candidates {
                prompt.push_str(&format!("\n{} {}", code, name));
            }
        }

        let messages = vec![ChatMessage::system(CLASSIFY_PROMPT), ChatMessage::user(prompt)];
        let content = self.call("classify_hint", messages).await?;
        let hint = reply::parse_code_hint(&content).map_err(|e| oracle_failure("classify_hint", 1, e))?;
        self.hints.insert(request.cache_key(), hint.clone());
        Ok(hint)
    }

    async fn call(&self, operation: &str, messages: Vec<ChatMessage>) -> Result<String> {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        if !self.breaker.allow() {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            return Err(oracle_failure(operation, 0, OracleError::CircuitOpen));
        }

        let start = Instant::now();
        let slot = self.slots.acquire().await;
        let slot = &slot;
        let messages = &messages;

        let outcome = self
            .retry
            .execute(operation, |attempt| async move {
                slot.pace().await;
                self.stats.attempts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(operation, attempt, slot = slot.index(), "Calling oracle");

                match tokio::time::timeout(self.request_timeout, self.transport.complete(messages)).await {
                    Ok(result) => result,
                    Err(_) => Err(OracleError::Timeout),
                }
            })
            .await;

        match outcome {
            Ok(content) => {
                self.breaker.record_success();
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    operation,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Oracle call completed"
                );
                Ok(content)
            }
            Err(RetryFailure { attempts, error }) => {
                self.breaker.record_failure();
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                Err(oracle_failure(operation, attempts, error))
            }
        }
    }
}

fn oracle_failure(operation: &str, attempts: u32, error: OracleError) -> Error {
    Error::ExternalService(format!(
        "oracle {} failed after {} attempt(s): {}",
        operation, attempts, error
    ))
}
