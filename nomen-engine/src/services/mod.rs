//! Service modules for name normalization and classification

pub mod batch_orchestrator;
pub mod classifier;
pub mod oracle;
pub mod pattern_engine;
pub mod reference_tree;
pub mod strategy_registry;

pub use batch_orchestrator::{BatchOrchestrator, BatchStats, BatchStatus};
pub use classifier::{ClassifyRequest, Classifier};
pub use oracle::{OracleClient, OracleError};
pub use pattern_engine::PatternEngine;
pub use reference_tree::KpvedTree;
pub use strategy_registry::StrategyRegistry;
