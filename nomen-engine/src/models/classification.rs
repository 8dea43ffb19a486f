//! Reference codes and classification results

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Row of the reference classifier table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpvedEntry {
    pub code: String,
    pub name: String,
    pub parent_code: Option<String>,
}

impl KpvedEntry {
    pub fn new(code: &str, name: &str, parent_code: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            parent_code: parent_code.map(str::to_string),
        }
    }
}

/// How a classification step produced its candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMethod {
    ExactName,
    Keyword,
    Lexical,
    RuleOverride,
    CategoryFolding,
    AncestorMerge,
    Priority,
    OracleAccepted,
    OracleRejected,
    OracleFailed,
    /// Goods name moved off a service or catch-all code to its keyword match
    SanityFallback,
    /// Goods name left on a service code at reduced confidence
    SanityPenalty,
}

/// One executed step of a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStep {
    /// Tree level of the step's candidate, 0 when no candidate
    pub level: u8,
    pub method: StepMethod,
    pub code: Option<String>,
    pub name: Option<String>,
    pub confidence: f64,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

/// Result of classifying one name; projected into a categorization stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub final_code: String,
    pub final_name: String,
    /// Always within [0, 1]
    pub final_confidence: f64,
    pub steps: Vec<ClassificationStep>,
    pub ai_calls_count: u32,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    pub category_original: Vec<String>,
    pub category_folded: Vec<String>,
    pub strategy_id: String,
}

/// External catalog item, read-only to this crate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
