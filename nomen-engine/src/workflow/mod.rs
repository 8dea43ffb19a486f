//! Session-driven normalization workflow

pub mod pipeline;
pub mod session_locks;

pub use pipeline::{
    AiStageOptions, CategorizationOutcome, NormalizationPipeline, ReferenceItem, ReferenceListing,
    SessionHistory, AI_CHAT_STAGE, AI_STAGE, CATEGORY_STAGE, DEFAULT_STRATEGY_ID, PATTERN_STAGE,
};
pub use session_locks::SessionLocks;
