//! Deterministic rule-based name rewriting
//!
//! Rules run in a fixed order. A pass that changed the text is followed by
//! another, so the output of [`PatternEngine::apply`] is a fixed point:
//! running the engine on its own output changes nothing.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static SPECIAL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[*#!_"«»;]+"#).expect("valid special chars regex"));

static TECHNICAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-ZА-ЯЁ]{1,4}-\d{3,}\b").expect("valid technical code regex"));

static ARTICLE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:артикул|арт|art)\.?\s*[:№]?\s*[\w-]*\d[\w-]*").expect("valid article regex")
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid word regex"));

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d+(?:[.,]\d+)?)\s*(килограмм(?:ов|а)?|кг|грамм(?:ов|а)?|гр|г|миллиметр(?:ов|а)?|мм|сантиметр(?:ов|а)?|см|миллилитр(?:ов|а)?|мл|литр(?:ов|а)?|л|метр(?:ов|а)?|м|штук(?:и|а)?|шт)\b(?:\s*\.)*",
    )
    .expect("valid quantity regex")
});

/// Upper bound on passes; real names settle in one or two
const MAX_PASSES: usize = 4;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([,.])").expect("valid punctuation regex"));

/// Known misspellings seen in accounting exports
const TYPOS: &[(&str, &str)] = &[
    ("молотак", "молоток"),
    ("малоток", "молоток"),
    ("малатак", "молоток"),
    ("отвертко", "отвертка"),
    ("плоскогубци", "плоскогубцы"),
    ("ножовко", "ножовка"),
    ("саморес", "саморез"),
    ("шурупп", "шуруп"),
    ("кабел", "кабель"),
    ("подшибник", "подшипник"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    SpecialChars,
    TechnicalCode,
    ArticleNumber,
    Casing,
    TypoCorrection,
    UnitNormalization,
    DuplicateWords,
    ExtraSpaces,
}

/// One rewrite rule with its stable identifier
#[derive(Debug, Clone, Copy)]
struct PatternRule {
    id: &'static str,
    confidence: f64,
    kind: RuleKind,
}

const RULES: &[PatternRule] = &[
    PatternRule { id: "special_chars", confidence: 0.80, kind: RuleKind::SpecialChars },
    PatternRule { id: "technical_code", confidence: 0.95, kind: RuleKind::TechnicalCode },
    PatternRule { id: "article_number", confidence: 0.90, kind: RuleKind::ArticleNumber },
    PatternRule { id: "casing", confidence: 0.70, kind: RuleKind::Casing },
    PatternRule { id: "typo_correction", confidence: 0.90, kind: RuleKind::TypoCorrection },
    PatternRule { id: "unit_normalization", confidence: 0.85, kind: RuleKind::UnitNormalization },
    PatternRule { id: "duplicate_words", confidence: 0.90, kind: RuleKind::DuplicateWords },
    PatternRule { id: "extra_spaces", confidence: 0.95, kind: RuleKind::ExtraSpaces },
];

/// Result of one pass over a name
#[derive(Debug, Clone, PartialEq)]
pub struct PatternOutcome {
    pub output: String,
    /// Rules that changed the text, in application order
    pub applied_patterns: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct PatternEngine {
    typos: HashMap<String, String>,
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternEngine {
    pub fn new() -> Self {
        Self {
            typos: TYPOS
                .iter()
                .map(|(wrong, right)| (wrong.to_string(), right.to_string()))
                .collect(),
        }
    }

    pub fn apply(&self, name: &str) -> PatternOutcome {
        let mut text = name.to_string();
        let mut fired: Vec<&PatternRule> = Vec::new();

        for _ in 0..MAX_PASSES {
            let before = text.clone();
            for rule in RULES {
                let next = self.apply_rule(rule.kind, &text);
                if next != text {
                    if !fired.iter().any(|r| r.id == rule.id) {
                        fired.push(rule);
                    }
                    text = next;
                }
            }
            if text == before {
                break;
            }
        }

        PatternOutcome {
            output: text,
            applied_patterns: fired.iter().map(|r| r.id.to_string()).collect(),
            confidence: outcome_confidence(&fired),
        }
    }

    fn apply_rule(&self, kind: RuleKind, text: &str) -> String {
        match kind {
            RuleKind::SpecialChars => SPECIAL_CHARS.replace_all(text, " ").into_owned(),
            RuleKind::TechnicalCode => TECHNICAL_CODE.replace_all(text, " ").into_owned(),
            RuleKind::ArticleNumber => ARTICLE_NUMBER.replace_all(text, " ").into_owned(),
            RuleKind::Casing => text.to_lowercase(),
            RuleKind::TypoCorrection => WORD
                .replace_all(text, |caps: &Captures| {
                    let word = &caps[0];
                    self.typos.get(word).cloned().unwrap_or_else(|| word.to_string())
                })
                .into_owned(),
            RuleKind::UnitNormalization => QUANTITY
                .replace_all(text, |caps: &Captures| {
                    format!("{} {}", &caps[1], canonical_unit(&caps[2]))
                })
                .into_owned(),
            RuleKind::DuplicateWords => drop_repeated_words(text),
            RuleKind::ExtraSpaces => {
                let collapsed = WHITESPACE.replace_all(text, " ");
                SPACE_BEFORE_PUNCT
                    .replace_all(collapsed.trim(), "$1")
                    .into_owned()
            }
        }
    }
}

fn canonical_unit(unit: &str) -> &'static str {
    if unit.starts_with("килограмм") || unit == "кг" {
        "кг"
    } else if unit.starts_with("грамм") || unit == "гр" || unit == "г" {
        "г"
    } else if unit.starts_with("миллиметр") || unit == "мм" {
        "мм"
    } else if unit.starts_with("сантиметр") || unit == "см" {
        "см"
    } else if unit.starts_with("миллилитр") || unit == "мл" {
        "мл"
    } else if unit.starts_with("литр") || unit == "л" {
        "л"
    } else if unit.starts_with("метр") || unit == "м" {
        "м"
    } else {
        "шт"
    }
}

/// Drop a word that repeats the previous word; numbers are left alone
fn drop_repeated_words(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut removed = false;

    for word in text.split_whitespace() {
        let repeats = kept
            .last()
            .map(|prev| prev.to_lowercase() == word.to_lowercase())
            .unwrap_or(false);
        if repeats && word.chars().any(char::is_alphabetic) {
            removed = true;
            continue;
        }
        kept.push(word);
    }

    if removed {
        kept.join(" ")
    } else {
        text.to_string()
    }
}

fn outcome_confidence(fired: &[&PatternRule]) -> f64 {
    if fired.is_empty() {
        return 1.0;
    }
    let mean = fired.iter().map(|r| r.confidence).sum::<f64>() / fired.len() as f64;
    (mean * 0.95).clamp(0.0, 1.0)
}
