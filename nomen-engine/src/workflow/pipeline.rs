//! Normalization pipeline
//!
//! Drives one catalog item's name through explicit, individually invoked
//! stages. Every mutation takes the session's lock, so concurrent calls on
//! the same session see each other's results in order.

use nomen_common::{Error, Result};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::SessionLocks;
use crate::db::{catalog, sessions};
use crate::models::{
    ClassificationResult, ClassificationStrategy, NewStage, NormalizationSession,
    NormalizationStage, SessionStatus, StageStatus, StageType, StatusTransition,
};
use crate::services::classifier::{ClassifyRequest, Classifier};
use crate::services::oracle::{ChatTurn, OracleClient};
use crate::services::pattern_engine::PatternEngine;
use crate::services::reference_tree::ReferenceNode;
use crate::services::strategy_registry::StrategyRegistry;

pub const PATTERN_STAGE: &str = "algorithmic_patterns";
pub const AI_STAGE: &str = "ai_correction";
pub const AI_CHAT_STAGE: &str = "ai_chat_correction";
pub const CATEGORY_STAGE: &str = "category_folding";
pub const DEFAULT_STRATEGY_ID: &str = "top_priority";

#[derive(Debug, Clone, Default)]
pub struct AiStageOptions {
    /// Replay earlier AI exchanges of the session to the oracle
    pub use_chat: bool,
    pub context_hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizationOutcome {
    pub stage: NormalizationStage,
    pub classification: ClassificationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionHistory {
    pub session: NormalizationSession,
    pub stages: Vec<NormalizationStage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceItem {
    pub code: String,
    pub name: String,
    pub level: u8,
    pub has_children: bool,
}

impl From<&ReferenceNode> for ReferenceItem {
    fn from(node: &ReferenceNode) -> Self {
        Self {
            code: node.code.clone(),
            name: node.name.clone(),
            level: node.level,
            has_children: !node.children.is_empty(),
        }
    }
}

/// One level of the reference tree and the way down to it
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceListing {
    /// Root-to-parent chain, empty at the top
    pub path: Vec<ReferenceItem>,
    pub children: Vec<ReferenceItem>,
}

pub struct NormalizationPipeline {
    db: SqlitePool,
    patterns: PatternEngine,
    oracle: Option<Arc<OracleClient>>,
    classifier: Arc<Classifier>,
    strategies: StrategyRegistry,
    locks: SessionLocks,
}

impl NormalizationPipeline {
    pub fn new(db: SqlitePool, classifier: Arc<Classifier>, oracle: Option<Arc<OracleClient>>) -> Self {
        Self {
            strategies: StrategyRegistry::new(db.clone()),
            db,
            patterns: PatternEngine::new(),
            oracle,
            classifier,
            locks: SessionLocks::new(),
        }
    }

    pub fn ai_enabled(&self) -> bool {
        self.oracle.is_some()
    }

    pub fn oracle(&self) -> Option<&Arc<OracleClient>> {
        self.oracle.as_ref()
    }

    pub async fn start_session(&self, catalog_item_id: i64, original_name: &str) -> Result<NormalizationSession> {
        if catalog_item_id <= 0 {
            return Err(Error::Validation(format!(
                "catalog_item_id must be positive, got {}",
                catalog_item_id
            )));
        }
        if original_name.trim().is_empty() {
            return Err(Error::Validation("original_name must not be empty".to_string()));
        }

        let session_id = sessions::create_session(&self.db, catalog_item_id, original_name).await?;
        tracing::info!(session_id, catalog_item_id, "Normalization session started");
        sessions::require_session(&self.db, session_id).await
    }

    pub async fn apply_pattern_stage(&self, session_id: i64) -> Result<NormalizationStage> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.open_session(session_id).await?;

        let outcome = self.patterns.apply(&session.current_name);
        let mut stage = NewStage::new(
            session_id,
            StageType::Pattern,
            PATTERN_STAGE,
            session.current_name.as_str(),
            outcome.output.as_str(),
            outcome.confidence,
        );
        stage.applied_patterns = outcome.applied_patterns;

        let stored = sessions::append_stage(&self.db, &stage).await?;
        tracing::debug!(
            session_id,
            stage_id = stored.id,
            patterns = ?stored.applied_patterns,
            "Pattern stage applied"
        );
        Ok(stored)
    }

    /// Oracle correction; an oracle failure is recorded as a failed stage
    /// and returned, leaving the session `in_progress`
    pub async fn apply_ai_stage(&self, session_id: i64, options: &AiStageOptions) -> Result<NormalizationStage> {
        let Some(oracle) = self.oracle.as_ref() else {
            return Err(Error::Validation(
                "AI stages are disabled: no oracle API key configured".to_string(),
            ));
        };

        let _guard = self.locks.acquire(session_id).await;
        let session = self.open_session(session_id).await?;

        let chat_history: Vec<ChatTurn> = if options.use_chat {
            sessions::get_history(&self.db, session_id)
                .await?
                .into_iter()
                .filter(|s| s.stage_type == StageType::Ai && s.status == StageStatus::Success)
                .map(|s| ChatTurn {
                    input: s.input_name,
                    output: s.output_name,
                    confidence: s.confidence,
                })
                .collect()
        } else {
            Vec::new()
        };
        let stage_name = if options.use_chat { AI_CHAT_STAGE } else { AI_STAGE };
        let input = session.current_name.clone();

        let stage = match oracle
            .correct(&input, &options.context_hints, &chat_history)
            .await
        {
            Ok(correction) => {
                let mut stage = NewStage::new(
                    session_id,
                    StageType::Ai,
                    stage_name,
                    input.as_str(),
                    correction.name.as_str(),
                    correction.confidence,
                );
                stage.ai_context = Some(json!({
                    "use_chat": options.use_chat,
                    "context_hints": options.context_hints,
                    "chat_history": chat_history,
                    "suggested_name": correction.name,
                    "confidence": correction.confidence,
                    "reasoning": correction.reasoning,
                }));
                stage
            }
            Err(err @ Error::ExternalService(_)) => {
                tracing::warn!(session_id, error = %err, "AI stage failed");
                let mut stage =
                    NewStage::new(session_id, StageType::Ai, stage_name, input.as_str(), input.as_str(), 0.0)
                        .failed(&err);
                stage.ai_context = Some(json!({
                    "use_chat": options.use_chat,
                    "context_hints": options.context_hints,
                    "chat_history": chat_history,
                }));
                stage
            }
            Err(err) => return Err(err),
        };

        let stored = sessions::append_stage(&self.db, &stage).await?;
        tracing::debug!(
            session_id,
            stage_id = stored.id,
            status = %stored.status,
            "AI stage recorded"
        );
        Ok(stored)
    }

    pub async fn apply_categorization_stage(
        &self,
        session_id: i64,
        strategy_id: &str,
    ) -> Result<CategorizationOutcome> {
        let strategy = self.strategies.get(strategy_id).await?;

        let _guard = self.locks.acquire(session_id).await;
        let session = self.open_session(session_id).await?;

        let category = catalog::get_catalog_item(&self.db, session.catalog_item_id)
            .await?
            .and_then(|item| item.category)
            .unwrap_or_default();

        let request = ClassifyRequest {
            name: session.current_name.clone(),
            category,
            item_code: Some(session.catalog_item_id.to_string()),
        };
        let classification = self.classifier.classify(&request, &strategy).await?;

        let mut stage = NewStage::new(
            session_id,
            StageType::Categorization,
            CATEGORY_STAGE,
            session.current_name.as_str(),
            session.current_name.as_str(),
            classification.final_confidence,
        );
        stage.category_original = Some(classification.category_original.clone());
        stage.category_folded = Some(classification.category_folded.clone());
        stage.classification_strategy = Some(strategy.id.clone());
        stage.classification_code = Some(classification.final_code.clone());
        stage.classification_name = Some(classification.final_name.clone());

        let stored = sessions::append_stage(&self.db, &stage).await?;
        tracing::debug!(
            session_id,
            stage_id = stored.id,
            code = %classification.final_code,
            confidence = classification.final_confidence,
            "Categorization stage applied"
        );

        Ok(CategorizationOutcome {
            stage: stored,
            classification,
        })
    }

    pub async fn get_history(&self, session_id: i64) -> Result<SessionHistory> {
        let session = sessions::require_session(&self.db, session_id).await?;
        let stages = sessions::get_history(&self.db, session_id).await?;
        Ok(SessionHistory { session, stages })
    }

    pub async fn revert_stage(&self, session_id: i64, target_stage_id: i64) -> Result<NormalizationSession> {
        let _guard = self.locks.acquire(session_id).await;
        sessions::revert_to_stage(&self.db, session_id, target_stage_id).await
    }

    pub async fn set_status(&self, session_id: i64, status: SessionStatus) -> Result<StatusTransition> {
        let _guard = self.locks.acquire(session_id).await;
        let transition = sessions::update_status(&self.db, session_id, status).await?;
        tracing::debug!(
            session_id,
            from = %transition.old_status,
            to = %transition.new_status,
            "Session status changed"
        );
        Ok(transition)
    }

    /// Classify a name without a session
    pub async fn classify_direct(
        &self,
        request: &ClassifyRequest,
        strategy_id: Option<&str>,
    ) -> Result<ClassificationResult> {
        let strategy = self
            .strategies
            .get(strategy_id.unwrap_or(DEFAULT_STRATEGY_ID))
            .await?;
        self.classifier.classify(request, &strategy).await
    }

    /// Top-level codes, or the path to `parent` and its children one level down
    pub fn browse_reference(&self, parent: Option<&str>) -> Result<ReferenceListing> {
        let tree = self.classifier.tree();
        let Some(code) = parent.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(ReferenceListing {
                path: Vec::new(),
                children: tree
                    .roots()
                    .iter()
                    .filter_map(|root| tree.node(root))
                    .map(ReferenceItem::from)
                    .collect(),
            });
        };

        let node = tree
            .node(code)
            .ok_or_else(|| Error::NotFound(format!("reference code {}", code)))?;
        Ok(ReferenceListing {
            path: tree.path(code).into_iter().map(ReferenceItem::from).collect(),
            children: tree
                .nodes_at_level(node.level + 1, Some(code))
                .into_iter()
                .map(ReferenceItem::from)
                .collect(),
        })
    }

    pub async fn list_strategies(&self, client_id: Option<i64>) -> Result<Vec<ClassificationStrategy>> {
        self.strategies.list(client_id).await
    }

    pub async fn create_or_update_strategy(&self, strategy: ClassificationStrategy) -> Result<String> {
        self.strategies.create_or_update(strategy).await
    }

    /// Load the session, re-opening it when terminal; caller holds the lock
    async fn open_session(&self, session_id: i64) -> Result<NormalizationSession> {
        let mut session = sessions::require_session(&self.db, session_id).await?;
        if session.status.is_terminal() {
            let transition = sessions::update_status(&self.db, session_id, SessionStatus::InProgress).await?;
            tracing::info!(
                session_id,
                from = %transition.old_status,
                "Session re-opened for a new stage"
            );
            session.status = SessionStatus::InProgress;
        }
        Ok(session)
    }
}
