//! Hierarchical reference-code classifier
//!
//! Deterministic lookup first (strategy rules, keywords, lexical overlap with
//! reference names, folded category path), then an optional oracle
//! tie-break when the deterministic answer is ambiguous or weak. A final
//! sanity check keeps goods off service sections and catch-all codes when
//! the keyword dictionary knows better.

use nomen_common::{Error, Result};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::db::reference;
use crate::models::{
    split_category, ClassificationResult, ClassificationStep, ClassificationStrategy, StepMethod,
};
use crate::services::oracle::{CodeHint, HintRequest, OracleClient};
use crate::services::reference_tree::{code_level, KpvedTree};

pub const HIGH_CONFIDENCE: f64 = 0.9;
pub const AMBIGUITY_MARGIN: f64 = 0.05;
pub const MIN_CONFIDENCE: f64 = 0.7;
pub const LEVEL_DECAY: f64 = 0.9;
pub const RULE_CONFIDENCE: f64 = 0.95;
const CATEGORY_FACTOR: f64 = 0.8;
const DESCENDANT_BOOST: f64 = 0.1;
const LEXICAL_CEILING: f64 = 0.85;
const STEM_LEN: usize = 5;
const FUZZY_THRESHOLD: f64 = 0.92;
const ORACLE_CANDIDATES: usize = 5;
const SERVICE_PENALTY: f64 = 0.5;
/// Numeric sections of the reference table that hold services, not goods
const SERVICE_SECTIONS: std::ops::RangeInclusive<u32> = 33..=99;
const CATCH_ALL_MARKER: &str = "прочие";

/// Word roots that mark a name as goods even without a keyword match
const GOODS_MARKERS: &[&str] = &[
    "датчик",
    "преобразовател",
    "издели",
    "материал",
    "оборудован",
    "инструмент",
    "детал",
    "подшипник",
    "клапан",
    "насос",
    "фильтр",
    "труб",
    "профил",
    "краск",
    "цемент",
    "сверл",
    "ключ",
];

/// Root word → (code, confidence)
const KEYWORDS: &[(&str, &str, f64)] = &[
    ("болт", "25.93.11", 0.98),
    ("гайк", "25.93.11", 0.97),
    ("винт", "25.93.11", 0.95),
    ("шуруп", "25.93.11", 0.95),
    ("саморез", "25.93.11", 0.95),
    ("шайб", "25.93.11", 0.93),
    ("молот", "25.73.30", 0.95),
    ("кувалд", "25.73.30", 0.95),
    ("лопат", "25.73.11", 0.95),
    ("заступ", "25.73.11", 0.93),
    ("кабел", "27.32.11", 0.98),
    ("провод", "27.32.11", 0.85),
];

#[derive(Debug, Clone, Default)]
pub struct ClassifyRequest {
    pub name: String,
    /// Raw category label, may be empty
    pub category: String,
    pub item_code: Option<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    code: String,
    confidence: f64,
    method: StepMethod,
}

#[derive(Debug)]
struct IndexedNode {
    code: String,
    normalized: String,
    tokens: Vec<String>,
}

pub struct Classifier {
    tree: Arc<KpvedTree>,
    index: Vec<IndexedNode>,
    keywords: Vec<(&'static str, &'static str, f64)>,
    oracle: Option<Arc<OracleClient>>,
}

impl Classifier {
    pub fn new(tree: Arc<KpvedTree>, oracle: Option<Arc<OracleClient>>) -> Self {
        let mut index: Vec<IndexedNode> = tree
            .nodes()
            .map(|node| IndexedNode {
                code: node.code.clone(),
                normalized: normalize_text(&node.name),
                tokens: tokenize(&node.name),
            })
            .collect();
        index.sort_by(|a, b| a.code.cmp(&b.code));

        let keywords: Vec<_> = KEYWORDS
            .iter()
            .copied()
            .filter(|(root, code, _)| {
                let known = tree.contains(code);
                if !known {
                    tracing::debug!(root, code, "Keyword code missing from reference table");
                }
                known
            })
            .collect();

        Self {
            tree,
            index,
            keywords,
            oracle,
        }
    }

    /// Build from the stored reference table
    pub async fn load(pool: &SqlitePool, oracle: Option<Arc<OracleClient>>) -> Result<Self> {
        let entries = reference::load_entries(pool).await?;
        let tree = KpvedTree::from_entries(&entries);
        tracing::info!(codes = tree.len(), "Reference tree loaded");
        Ok(Self::new(Arc::new(tree), oracle))
    }

    pub fn tree(&self) -> &KpvedTree {
        &self.tree
    }

    pub async fn classify(
        &self,
        request: &ClassifyRequest,
        strategy: &ClassificationStrategy,
    ) -> Result<ClassificationResult> {
        if request.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }

        let started = Instant::now();
        let category_original = split_category(&request.category);
        let category_folded = strategy.fold(&category_original);
        let mut steps = Vec::new();
        let mut ai_calls_count = 0;

        let finish = |code: String, confidence: f64, steps: Vec<ClassificationStep>, ai_calls_count: u32| {
            let final_name = self.tree.node(&code).map(|n| n.name.clone()).unwrap_or_default();
            ClassificationResult {
                final_code: code,
                final_name,
                final_confidence: confidence.clamp(0.0, 1.0),
                steps,
                ai_calls_count,
                total_duration: started.elapsed(),
                category_original: category_original.clone(),
                category_folded: category_folded.clone(),
                strategy_id: strategy.id.clone(),
            }
        };

        // Explicit rules win outright
        let step_start = Instant::now();
        if let Some(rule) = strategy.matching_rule(&request.category, &category_original) {
            if self.tree.contains(&rule.code) {
                steps.push(self.step(StepMethod::RuleOverride, Some(&rule.code), RULE_CONFIDENCE, step_start));
                return Ok(finish(rule.code.clone(), RULE_CONFIDENCE, steps, 0));
            }
            tracing::warn!(
                strategy = %strategy.id,
                code = %rule.code,
                "Strategy rule points at an unknown reference code"
            );
        }

        // Name lookup
        let step_start = Instant::now();
        let mut pool = self.lexical_candidates(&request.name);
        let best_name = best_of(&pool).cloned();
        steps.push(match &best_name {
            Some(c) => self.step(c.method, Some(&c.code), c.confidence, step_start),
            None => self.step(StepMethod::Lexical, None, 0.0, step_start),
        });

        if let Some(best) = best_name.filter(|b| b.confidence >= HIGH_CONFIDENCE) {
            let clear_lead = pool
                .get(1)
                .map(|second| best.confidence - second.confidence >= AMBIGUITY_MARGIN)
                .unwrap_or(true);
            if clear_lead {
                let best = self.sanity_check(&request.name, best, &mut steps);
                return Ok(finish(best.code, best.confidence, steps, 0));
            }
        }

        // Folded category path
        if !category_folded.is_empty() {
            let step_start = Instant::now();
            let mut category_pool: Vec<Candidate> = Vec::new();
            for segment in &category_folded {
                for mut candidate in self.lexical_candidates(segment) {
                    candidate.confidence *= CATEGORY_FACTOR;
                    candidate.method = StepMethod::CategoryFolding;
                    category_pool.push(candidate);
                }
            }
            let category_pool = dedupe(category_pool);

            for candidate in pool.iter_mut() {
                let boosted = category_pool
                    .iter()
                    .any(|c| c.code != candidate.code && self.tree.is_descendant_of(&candidate.code, &c.code));
                if boosted {
                    candidate.confidence = (candidate.confidence + DESCENDANT_BOOST).min(1.0);
                }
            }

            let best_category = best_of(&category_pool).cloned();
            steps.push(match &best_category {
                Some(c) => self.step(StepMethod::CategoryFolding, Some(&c.code), c.confidence, step_start),
                None => self.step(StepMethod::CategoryFolding, None, 0.0, step_start),
            });
            pool.extend(category_pool);
        }

        let mut pool = dedupe(pool);
        sort_candidates(&mut pool);

        let ambiguous_pair = pool.len() >= 2 && pool[0].confidence - pool[1].confidence < AMBIGUITY_MARGIN;
        if ambiguous_pair {
            let step_start = Instant::now();
            if let Some(resolved) = self.resolve_ambiguity(&pool, strategy) {
                steps.push(self.step(resolved.method, Some(&resolved.code), resolved.confidence, step_start));
                let replaced = [pool[0].code.clone(), pool[1].code.clone(), resolved.code.clone()];
                pool.retain(|c| !replaced.contains(&c.code));
                pool.push(resolved);
                sort_candidates(&mut pool);
            }
        }

        let mut best = pool.first().cloned();
        let weak = best.as_ref().map(|b| b.confidence < MIN_CONFIDENCE).unwrap_or(true);

        if ambiguous_pair || weak {
            if let Some(oracle) = &self.oracle {
                let step_start = Instant::now();
                match self.oracle_hint(oracle, request, &pool, &mut ai_calls_count).await {
                    Ok(hint) => {
                        let beats = best.as_ref().map(|b| hint.confidence > b.confidence).unwrap_or(true);
                        if self.tree.contains(&hint.code) && beats {
                            steps.push(self.step(StepMethod::OracleAccepted, Some(&hint.code), hint.confidence, step_start));
                            best = Some(Candidate {
                                code: hint.code,
                                confidence: hint.confidence,
                                method: StepMethod::OracleAccepted,
                            });
                        } else {
                            tracing::debug!(
                                code = %hint.code,
                                confidence = hint.confidence,
                                "Oracle suggestion not taken"
                            );
                            steps.push(self.step(StepMethod::OracleRejected, Some(&hint.code), hint.confidence, step_start));
                        }
                    }
                    Err(e) => {
                        steps.push(self.step(StepMethod::OracleFailed, None, 0.0, step_start));
                        if best.is_none() {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, "Oracle tie-break failed, keeping deterministic result");
                    }
                }
            }
        }

        match best {
            Some(candidate) => {
                let candidate = self.sanity_check(&request.name, candidate, &mut steps);
                Ok(finish(candidate.code, candidate.confidence, steps, ai_calls_count))
            }
            None => Err(Error::NotFound(format!(
                "no reference code matches '{}'",
                request.name.trim()
            ))),
        }
    }

    /// Goods that resolved to a service section, or to a catch-all "прочие"
    /// node, move to their keyword match when it is a better fit. A service
    /// code with no such match keeps half its confidence.
    fn sanity_check(&self, name: &str, best: Candidate, steps: &mut Vec<ClassificationStep>) -> Candidate {
        let step_start = Instant::now();
        let tokens = tokenize(name);
        let keyword = self.keyword_match(&tokens);
        let goods = keyword.is_some()
            || tokens
                .iter()
                .any(|t| GOODS_MARKERS.iter().any(|marker| t.starts_with(marker)));
        if !goods {
            return best;
        }

        let fallback = if is_service_code(&best.code) {
            keyword.filter(|k| !is_service_code(&k.code))
        } else if self.is_catch_all(&best.code) {
            keyword.filter(|k| k.code != best.code && !self.is_catch_all(&k.code))
        } else {
            return best;
        };

        match fallback {
            Some(keyword) => {
                tracing::info!(
                    name,
                    from = %best.code,
                    to = %keyword.code,
                    "Classification corrected to keyword match"
                );
                steps.push(self.step(StepMethod::SanityFallback, Some(&keyword.code), keyword.confidence, step_start));
                Candidate {
                    method: StepMethod::SanityFallback,
                    ..keyword
                }
            }
            None if is_service_code(&best.code) => {
                let confidence = best.confidence * SERVICE_PENALTY;
                tracing::warn!(name, code = %best.code, confidence, "Goods name classified as a service");
                steps.push(self.step(StepMethod::SanityPenalty, Some(&best.code), confidence, step_start));
                Candidate {
                    confidence,
                    method: StepMethod::SanityPenalty,
                    ..best
                }
            }
            None => best,
        }
    }

    fn keyword_match(&self, tokens: &[String]) -> Option<Candidate> {
        self.keywords
            .iter()
            .filter(|(root, _, _)| tokens.iter().any(|t| t.starts_with(root)))
            .map(|(_, code, confidence)| Candidate {
                code: code.to_string(),
                confidence: *confidence,
                method: StepMethod::Keyword,
            })
            .min_by(compare_candidates)
    }

    fn is_catch_all(&self, code: &str) -> bool {
        self.tree
            .node(code)
            .map(|n| n.name.to_lowercase().contains(CATCH_ALL_MARKER))
            .unwrap_or(false)
    }

    /// Priority list first, then a walk up to the shared ancestor
    fn resolve_ambiguity(&self, pool: &[Candidate], strategy: &ClassificationStrategy) -> Option<Candidate> {
        let (first, second) = (&pool[0], &pool[1]);

        let rank_first = strategy.priority_rank(&first.code);
        let rank_second = strategy.priority_rank(&second.code);
        if rank_first != rank_second {
            let winner = if rank_first < rank_second { first } else { second };
            return Some(Candidate {
                code: winner.code.clone(),
                confidence: first.confidence.max(second.confidence),
                method: StepMethod::Priority,
            });
        }

        let (ancestor, steps_a, steps_b) = self.tree.lowest_common_ancestor(&first.code, &second.code)?;
        let steps = steps_a.max(steps_b);
        if steps_a > strategy.max_depth || steps_b > strategy.max_depth {
            return None;
        }
        let mean = (first.confidence + second.confidence) / 2.0;
        Some(Candidate {
            code: ancestor.code.clone(),
            confidence: (mean * LEVEL_DECAY.powi(steps as i32)).clamp(0.0, 1.0),
            method: StepMethod::AncestorMerge,
        })
    }

    async fn oracle_hint(
        &self,
        oracle: &OracleClient,
        request: &ClassifyRequest,
        pool: &[Candidate],
        ai_calls_count: &mut u32,
    ) -> Result<CodeHint> {
        let hint_request = HintRequest {
            name: request.name.clone(),
            category: request.category.clone(),
            item_code: request.item_code.clone(),
            candidates: pool
                .iter()
                .take(ORACLE_CANDIDATES)
                .map(|c| {
                    let name = self.tree.node(&c.code).map(|n| n.name.clone()).unwrap_or_default();
                    (c.code.clone(), name)
                })
                .collect(),
        };

        if let Some(hit) = oracle.cached_hint(&hint_request) {
            tracing::debug!(name = %request.name, "Oracle hint served from cache");
            return Ok(hit);
        }

        *ai_calls_count += 1;
        oracle.classify_hint(&hint_request).await
    }

    /// Keyword and reference-name matches for free text
    fn lexical_candidates(&self, text: &str) -> Vec<Candidate> {
        let normalized = normalize_text(text);
        let tokens = tokenize(text);
        let mut found = Vec::new();

        for node in &self.index {
            if !normalized.is_empty() && node.normalized == normalized {
                found.push(Candidate {
                    code: node.code.clone(),
                    confidence: 1.0,
                    method: StepMethod::ExactName,
                });
            }
        }

        for (root, code, confidence) in &self.keywords {
            if tokens.iter().any(|t| t.starts_with(root)) {
                found.push(Candidate {
                    code: code.to_string(),
                    confidence: *confidence,
                    method: StepMethod::Keyword,
                });
            }
        }

        if !tokens.is_empty() {
            for node in &self.index {
                let matched = tokens
                    .iter()
                    .filter(|t| node.tokens.iter().any(|n| words_match(t, n)))
                    .count();
                if matched > 0 {
                    found.push(Candidate {
                        code: node.code.clone(),
                        confidence: LEXICAL_CEILING * matched as f64 / tokens.len() as f64,
                        method: StepMethod::Lexical,
                    });
                }
            }
        }

        dedupe(found)
    }

    fn step(&self, method: StepMethod, code: Option<&str>, confidence: f64, started: Instant) -> ClassificationStep {
        ClassificationStep {
            level: code.and_then(code_level).unwrap_or(0),
            method,
            code: code.map(str::to_string),
            name: code.and_then(|c| self.tree.node(c)).map(|n| n.name.clone()),
            confidence: confidence.clamp(0.0, 1.0),
            duration: started.elapsed(),
        }
    }
}

fn best_of(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().min_by(|a, b| compare_candidates(a, b))
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.code.cmp(&b.code))
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare_candidates);
}

/// One candidate per code, keeping the most confident
fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_code: HashMap<String, Candidate> = HashMap::new();
    for candidate in candidates {
        match by_code.get(&candidate.code) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                by_code.insert(candidate.code.clone(), candidate);
            }
        }
    }
    let mut unique: Vec<Candidate> = by_code.into_values().collect();
    sort_candidates(&mut unique);
    unique
}

fn is_service_code(code: &str) -> bool {
    code.split('.')
        .next()
        .filter(|section| section.len() == 2)
        .and_then(|section| section.parse::<u32>().ok())
        .map(|section| SERVICE_SECTIONS.contains(&section))
        .unwrap_or(false)
}

/// Lowercase words of three or more letters
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3 && t.chars().all(char::is_alphabetic))
        .map(str::to_string)
        .collect()
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn words_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let stem_a: String = a.chars().take(STEM_LEN).collect();
    let stem_b: String = b.chars().take(STEM_LEN).collect();
    if stem_a.chars().count() == STEM_LEN && stem_a == stem_b {
        return true;
    }
    strsim::jaro_winkler(a, b) >= FUZZY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{builtin_strategies, KpvedEntry, StrategyRule};
    use crate::services::oracle::tests::{test_config, MockTransport};
    use crate::services::oracle::OracleError;
    use crate::services::reference_tree::tests::sample_entries;

    fn classifier(oracle: Option<Arc<OracleClient>>) -> Classifier {
        Classifier::new(Arc::new(KpvedTree::from_entries(&sample_entries())), oracle)
    }

    fn top_priority() -> ClassificationStrategy {
        builtin_strategies().remove(0)
    }

    fn request(name: &str, category: &str) -> ClassifyRequest {
        ClassifyRequest {
            name: name.to_string(),
            category: category.to_string(),
            item_code: None,
        }
    }

    fn oracle_replying(content: &str) -> (Arc<MockTransport>, Arc<OracleClient>) {
        let transport = Arc::new(MockTransport::replying(content));
        let client = Arc::new(OracleClient::new(&test_config(1, 0), transport.clone()));
        (transport, client)
    }

    #[tokio::test]
    async fn test_hammer_classified_by_keyword() {
        let result = classifier(None)
            .classify(&request("молоток строительный 500 г", ""), &top_priority())
            .await
            .unwrap();

        assert_eq!(result.final_code, "25.73.30");
        assert!(result.final_confidence > 0.0 && result.final_confidence <= 1.0);
        assert_eq!(result.strategy_id, "top_priority");
        assert_eq!(result.ai_calls_count, 0);
        assert_eq!(result.steps[0].method, StepMethod::Keyword);
        assert_eq!(result.steps[0].level, 6);
    }

    #[tokio::test]
    async fn test_exact_reference_name() {
        let result = classifier(None)
            .classify(&request("Кабели силовые", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(result.final_code, "27.32.11");
        assert_eq!(result.final_confidence, 1.0);
    }

    #[tokio::test]
    async fn test_rule_override_wins() {
        let mut strategy = top_priority();
        strategy.rules.push(StrategyRule {
            category: "крепеж".to_string(),
            code: "25.93.11".to_string(),
        });

        let result = classifier(None)
            .classify(&request("молоток", "Метизы / Крепеж"), &strategy)
            .await
            .unwrap();
        assert_eq!(result.final_code, "25.93.11");
        assert_eq!(result.final_confidence, RULE_CONFIDENCE);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].method, StepMethod::RuleOverride);
    }

    #[tokio::test]
    async fn test_category_is_folded_and_boosts_descendants() {
        let result = classifier(None)
            .classify(
                &request("ключи гаечные", "Инструменты / Ручной инструмент / Ударный / Молотки"),
                &top_priority(),
            )
            .await
            .unwrap();

        assert_eq!(result.final_code, "25.73.30");
        assert_eq!(result.category_original.len(), 4);
        assert_eq!(
            result.category_folded,
            vec!["Инструменты".to_string(), "Ручной инструмент / Ударный / Молотки".to_string()]
        );
        assert!((result.final_confidence - (LEXICAL_CEILING + DESCENDANT_BOOST)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_candidates_merge_into_ancestor() {
        let result = classifier(None)
            .classify(&request("изделия металлические", ""), &top_priority())
            .await
            .unwrap();

        assert_eq!(result.final_code, "25");
        assert!(result.steps.iter().any(|s| s.method == StepMethod::AncestorMerge));
        assert!((result.final_confidence - LEXICAL_CEILING * LEVEL_DECAY).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_priority_breaks_close_candidates() {
        let mut strategy = top_priority();
        strategy.priority = vec!["25.9".to_string()];

        let result = classifier(None)
            .classify(&request("изделия металлические", ""), &strategy)
            .await
            .unwrap();
        assert_eq!(result.final_code, "25.9");
        assert!(result.steps.iter().any(|s| s.method == StepMethod::Priority));
    }

    #[tokio::test]
    async fn test_no_candidate_without_oracle_is_not_found() {
        let result = classifier(None)
            .classify(&request("абракадабра", ""), &top_priority())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_oracle_fills_missing_candidate() {
        let (transport, oracle) = oracle_replying(r#"{"code": "25.93.11", "confidence": 0.8}"#);
        let result = classifier(Some(oracle))
            .classify(&request("абракадабра", ""), &top_priority())
            .await
            .unwrap();

        assert_eq!(result.final_code, "25.93.11");
        assert_eq!(result.ai_calls_count, 1);
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confidence_tie_keeps_deterministic_result() {
        // One of two tokens matches "Изделия ножевые, ..." for 0.85 / 2
        let deterministic = classifier(None)
            .classify(&request("ножевые абв", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(deterministic.final_code, "25.7");
        assert_eq!(deterministic.final_confidence, 0.425);

        let (transport, oracle) = oracle_replying(r#"{"code": "25.73", "confidence": 0.425}"#);
        let result = classifier(Some(oracle))
            .classify(&request("ножевые абв", ""), &top_priority())
            .await
            .unwrap();

        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(result.final_code, "25.7");
        assert_eq!(result.final_confidence, 0.425);
        assert_eq!(result.steps.last().unwrap().method, StepMethod::OracleRejected);
    }

    #[tokio::test]
    async fn test_more_confident_oracle_replaces_result() {
        let (_, oracle) = oracle_replying(r#"{"code": "25.9", "confidence": 0.97}"#);
        let result = classifier(Some(oracle))
            .classify(&request("изделия металлические", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(result.final_code, "25.9");
        assert_eq!(result.final_confidence, 0.97);
    }

    #[tokio::test]
    async fn test_unknown_oracle_code_is_rejected() {
        let (_, oracle) = oracle_replying(r#"{"code": "99.99.99", "confidence": 0.99}"#);
        let result = classifier(Some(oracle))
            .classify(&request("изделия металлические", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(result.final_code, "25");
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_deterministic_result() {
        let transport = Arc::new(MockTransport::failing(OracleError::Api(400, "bad".into())));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), transport));
        let classifier = classifier(Some(oracle));

        let result = classifier
            .classify(&request("изделия металлические", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(result.final_code, "25");
        assert_eq!(result.steps.last().unwrap().method, StepMethod::OracleFailed);

        let missing = classifier.classify(&request("абракадабра", ""), &top_priority()).await;
        assert!(matches!(missing, Err(Error::ExternalService(_))));
    }

    #[tokio::test]
    async fn test_oracle_hints_are_cached() {
        let (transport, oracle) = oracle_replying(r#"{"code": "25.93.11", "confidence": 0.8}"#);
        let classifier = classifier(Some(oracle));

        for _ in 0..3 {
            classifier
                .classify(&request("абракадабра", ""), &top_priority())
                .await
                .unwrap();
        }
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confident_result_skips_oracle() {
        let (transport, oracle) = oracle_replying(r#"{"code": "25.9", "confidence": 1.0}"#);
        let result = classifier(Some(oracle))
            .classify(&request("болт м10", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(result.final_code, "25.93.11");
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_evicted_hint_is_requested_again() {
        let transport = Arc::new(MockTransport::replying(r#"{"code": "25.93.11", "confidence": 0.8}"#));
        let mut config = test_config(1, 0);
        config.cache_max_entries = 1;
        let oracle = Arc::new(OracleClient::new(&config, transport.clone()));
        let classifier = classifier(Some(oracle));

        for name in ["абракадабра", "шмурдяк", "абракадабра"] {
            classifier.classify(&request(name, ""), &top_priority()).await.unwrap();
        }
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    /// Sample tree plus a service section
    fn entries_with_services() -> Vec<KpvedEntry> {
        let mut entries = sample_entries();
        entries.extend([
            KpvedEntry::new("M", "Услуги профессиональные, научные и технические", None),
            KpvedEntry::new("71", "Услуги в области архитектуры и инженерно-технического проектирования", Some("M")),
            KpvedEntry::new("71.2", "Услуги по техническим испытаниям и анализу", None),
            KpvedEntry::new("71.20", "Услуги по техническим испытаниям и анализу", None),
            KpvedEntry::new("71.20.1", "Услуги по техническим испытаниям и анализу", None),
        ]);
        entries
    }

    fn with_services() -> Classifier {
        Classifier::new(Arc::new(KpvedTree::from_entries(&entries_with_services())), None)
    }

    fn candidate(code: &str, confidence: f64) -> Candidate {
        Candidate {
            code: code.to_string(),
            confidence,
            method: StepMethod::OracleAccepted,
        }
    }

    #[test]
    fn test_service_code_for_goods_falls_back_to_keyword() {
        let classifier = with_services();
        let mut steps = Vec::new();

        let fixed = classifier.sanity_check("болт м10", candidate("71.20.1", 0.9), &mut steps);
        assert_eq!(fixed.code, "25.93.11");
        assert_eq!(fixed.confidence, 0.98);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].method, StepMethod::SanityFallback);
    }

    #[test]
    fn test_service_code_without_keyword_is_penalized() {
        let classifier = with_services();
        let mut steps = Vec::new();

        let kept = classifier.sanity_check("датчик давления", candidate("71.20.1", 0.9), &mut steps);
        assert_eq!(kept.code, "71.20.1");
        assert_eq!(kept.confidence, 0.45);
        assert_eq!(steps[0].method, StepMethod::SanityPenalty);
    }

    #[test]
    fn test_catch_all_code_moves_to_keyword_match() {
        let classifier = with_services();
        let mut steps = Vec::new();

        let fixed = classifier.sanity_check("провод монтажный", candidate("27.32", 0.8), &mut steps);
        assert_eq!(fixed.code, "27.32.11");
        assert_eq!(fixed.method, StepMethod::SanityFallback);
    }

    #[test]
    fn test_sanity_check_leaves_services_and_plain_codes_alone() {
        let classifier = with_services();
        let mut steps = Vec::new();

        let service = classifier.sanity_check("поверка средств измерений", candidate("71.20.1", 0.9), &mut steps);
        assert_eq!(service.confidence, 0.9);
        let goods = classifier.sanity_check("болт м10", candidate("25.93.11", 0.98), &mut steps);
        assert_eq!(goods.code, "25.93.11");
        let same_keyword = classifier.sanity_check("молоток", candidate("25.73.30", 0.95), &mut steps);
        assert_eq!(same_keyword.method, StepMethod::OracleAccepted);
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn test_oracle_service_suggestion_for_goods_is_penalized() {
        let transport = Arc::new(MockTransport::replying(r#"{"code": "71.20.1", "confidence": 0.9}"#));
        let oracle = Arc::new(OracleClient::new(&test_config(1, 0), transport));
        let classifier = Classifier::new(Arc::new(KpvedTree::from_entries(&entries_with_services())), Some(oracle));

        let result = classifier
            .classify(&request("датчик давления", ""), &top_priority())
            .await
            .unwrap();
        assert_eq!(result.final_code, "71.20.1");
        assert_eq!(result.final_confidence, 0.45);
        assert_eq!(result.steps.last().unwrap().method, StepMethod::SanityPenalty);
    }

    #[test]
    fn test_service_sections() {
        assert!(is_service_code("71.20.1"));
        assert!(is_service_code("96"));
        assert!(!is_service_code("25.93.11"));
        assert!(!is_service_code("M"));
    }

    #[test]
    fn test_tokenize_skips_numbers_and_short_words() {
        assert_eq!(tokenize("Болт М10 из стали 8.8"), vec!["болт", "стали"]);
    }
}
