//! Data models for the normalization engine

pub mod classification;
pub mod session;
pub mod stage;
pub mod strategy;

pub use classification::{
    CatalogItem, ClassificationResult, ClassificationStep, KpvedEntry, StepMethod,
};
pub use session::{NormalizationSession, SessionStatus, StatusTransition};
pub use stage::{NewStage, NormalizationStage, StageStatus, StageType};
pub use strategy::{
    builtin_strategies, fold_path, split_category, ClassificationStrategy, FoldAnchor,
    StrategyRule,
};
