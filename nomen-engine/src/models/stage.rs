//! Normalization stages: immutable steps of a session's version log

use chrono::{DateTime, Utc};
use nomen_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed set of stage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Deterministic rule-based rewrite
    Pattern,
    /// Oracle-assisted correction
    Ai,
    /// Reference-code classification (name is left unchanged)
    Categorization,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Pattern => "pattern",
            StageType::Ai => "ai",
            StageType::Categorization => "categorization",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pattern" => Ok(StageType::Pattern),
            "ai" => Ok(StageType::Ai),
            "categorization" => Ok(StageType::Categorization),
            other => Err(Error::Internal(format!("Unknown stage type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(StageStatus::Success),
            "failed" => Ok(StageStatus::Failed),
            other => Err(Error::Internal(format!("Unknown stage status: {}", other))),
        }
    }
}

/// Persisted stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStage {
    pub id: i64,
    pub session_id: i64,
    /// 1-based position in the session's version log
    pub ordinal: i64,
    pub stage_type: StageType,
    pub stage_name: String,
    pub input_name: String,
    pub output_name: String,
    /// Rule identifiers that actually changed the text
    pub applied_patterns: Vec<String>,
    /// JSON document describing the oracle exchange, AI stages only
    pub ai_context: Option<serde_json::Value>,
    pub category_original: Option<Vec<String>>,
    pub category_folded: Option<Vec<String>>,
    pub classification_strategy: Option<String>,
    pub classification_code: Option<String>,
    pub classification_name: Option<String>,
    pub confidence: f64,
    pub status: StageStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stage contents before the store assigns id, ordinal and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewStage {
    pub session_id: i64,
    pub stage_type: StageType,
    pub stage_name: String,
    pub input_name: String,
    pub output_name: String,
    pub applied_patterns: Vec<String>,
    pub ai_context: Option<serde_json::Value>,
    pub category_original: Option<Vec<String>>,
    pub category_folded: Option<Vec<String>>,
    pub classification_strategy: Option<String>,
    pub classification_code: Option<String>,
    pub classification_name: Option<String>,
    pub confidence: f64,
    pub status: StageStatus,
    pub error_message: Option<String>,
}

impl NewStage {
    /// Successful stage with only the chain fields set
    pub fn new(
        session_id: i64,
        stage_type: StageType,
        stage_name: impl Into<String>,
        input_name: impl Into<String>,
        output_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            session_id,
            stage_type,
            stage_name: stage_name.into(),
            input_name: input_name.into(),
            output_name: output_name.into(),
            applied_patterns: Vec::new(),
            ai_context: None,
            category_original: None,
            category_folded: None,
            classification_strategy: None,
            classification_code: None,
            classification_name: None,
            confidence: confidence.clamp(0.0, 1.0),
            status: StageStatus::Success,
            error_message: None,
        }
    }

    /// Mark as failed; a failed stage leaves the name unchanged
    pub fn failed(mut self, error: &Error) -> Self {
        self.status = StageStatus::Failed;
        self.output_name = self.input_name.clone();
        self.confidence = 0.0;
        self.error_message = Some(format!("{}: {}", error.kind(), error));
        self
    }
}
