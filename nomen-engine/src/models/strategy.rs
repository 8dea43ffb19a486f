//! Category folding strategies

use chrono::{DateTime, Utc};
use nomen_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Deepest category path a strategy may fold into
pub const MAX_FOLD_DEPTH: usize = 6;

/// Which end of a raw category path survives folding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldAnchor {
    /// Keep leading levels, merge the tail into the last slot
    Top,
    /// Keep trailing levels, merge the head into the first slot
    Bottom,
    /// Keep leading levels, replace the tail with the leaf
    Mixed,
}

impl FoldAnchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoldAnchor::Top => "top",
            FoldAnchor::Bottom => "bottom",
            FoldAnchor::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "top" => Ok(FoldAnchor::Top),
            "bottom" => Ok(FoldAnchor::Bottom),
            "mixed" => Ok(FoldAnchor::Mixed),
            other => Err(Error::Validation(format!("Unknown fold anchor: {}", other))),
        }
    }
}

/// Explicit category → code override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRule {
    pub category: String,
    pub code: String,
}

/// Tenant-scoped configuration of category folding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStrategy {
    /// Generated when empty on create
    #[serde(default)]
    pub id: String,
    /// `None` means global
    #[serde(default)]
    pub client_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_depth: usize,
    #[serde(default = "default_anchor")]
    pub anchor: FoldAnchor,
    /// Code prefixes, earliest wins ties
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default)]
    pub rules: Vec<StrategyRule>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_anchor() -> FoldAnchor {
    FoldAnchor::Top
}

impl ClassificationStrategy {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("strategy name is required".to_string()));
        }
        if self.max_depth == 0 || self.max_depth > MAX_FOLD_DEPTH {
            return Err(Error::Validation(format!(
                "max_depth must be between 1 and {}, got {}",
                MAX_FOLD_DEPTH, self.max_depth
            )));
        }
        for rule in &self.rules {
            if rule.category.trim().is_empty() || rule.code.trim().is_empty() {
                return Err(Error::Validation(
                    "strategy rules need both category and code".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Rank of `code` in the priority list; codes matching no prefix rank last
    pub fn priority_rank(&self, code: &str) -> usize {
        self.priority
            .iter()
            .position(|prefix| code.starts_with(prefix.as_str()))
            .unwrap_or(self.priority.len())
    }

    /// First rule matching the whole label or any of its path segments
    pub fn matching_rule(&self, raw_label: &str, segments: &[String]) -> Option<&StrategyRule> {
        let label = raw_label.trim().to_lowercase();
        self.rules.iter().find(|rule| {
            let wanted = rule.category.trim().to_lowercase();
            wanted == label || segments.iter().any(|s| s.to_lowercase() == wanted)
        })
    }

    /// Fold a category path to at most `max_depth` levels
    pub fn fold(&self, path: &[String]) -> Vec<String> {
        fold_path(path, self.max_depth, self.anchor)
    }
}

/// Split a raw category label into trimmed, non-empty segments
pub fn split_category(label: &str) -> Vec<String> {
    label
        .split(['/', '>', '\\', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fold `path` to at most `max_depth` levels around `anchor`
pub fn fold_path(path: &[String], max_depth: usize, anchor: FoldAnchor) -> Vec<String> {
    if path.len() <= max_depth || max_depth == 0 {
        return path.to_vec();
    }

    let keep = max_depth - 1;
    match anchor {
        FoldAnchor::Top => {
            let mut folded = path[..keep].to_vec();
            folded.push(path[keep..].join(" / "));
            folded
        }
        FoldAnchor::Bottom => {
            let split = path.len() - keep;
            let mut folded = vec![path[..split].join(" / ")];
            folded.extend_from_slice(&path[split..]);
            folded
        }
        FoldAnchor::Mixed => {
            let mut folded = path[..keep].to_vec();
            if let Some(leaf) = path.last() {
                folded.push(leaf.clone());
            }
            folded
        }
    }
}

/// Built-in global strategies
pub fn builtin_strategies() -> Vec<ClassificationStrategy> {
    let now = Utc::now();
    let make = |id: &str, name: &str, description: &str, anchor: FoldAnchor| ClassificationStrategy {
        id: id.to_string(),
        client_id: None,
        name: name.to_string(),
        description: description.to_string(),
        max_depth: 2,
        anchor,
        priority: Vec::new(),
        rules: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    vec![
        make(
            "top_priority",
            "Top levels",
            "Keeps the first level and merges the rest into the second",
            FoldAnchor::Top,
        ),
        make(
            "bottom_priority",
            "Bottom levels",
            "Keeps the leaf and merges the head into the first level",
            FoldAnchor::Bottom,
        ),
        make(
            "mixed_priority",
            "First and last",
            "Keeps the first level and the leaf",
            FoldAnchor::Mixed,
        ),
    ]
}
