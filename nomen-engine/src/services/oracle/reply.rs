//! Parsing of free-form oracle replies

use serde::Deserialize;
use serde_json::Value;

use super::transport::OracleError;

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Corrected name suggested by the oracle
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub name: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Reference code suggested by the oracle
#[derive(Debug, Clone, PartialEq)]
pub struct CodeHint {
    pub code: String,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(alias = "corrected_name", alias = "name")]
    normalized_name: Option<String>,
    #[serde(alias = "kpved_code")]
    code: Option<String>,
    confidence: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// First balanced `{...}` object in `content`, ignoring code fences
pub fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Map a reported confidence into [0, 1]
///
/// Missing or zero becomes 0.5; percentages are scaled down.
pub fn normalize_confidence(raw: Option<f64>) -> f64 {
    match raw {
        None => DEFAULT_CONFIDENCE,
        Some(value) if value.is_nan() || value == 0.0 => DEFAULT_CONFIDENCE,
        Some(value) if value > 1.0 && value <= 100.0 => value / 100.0,
        Some(value) => value.clamp(0.0, 1.0),
    }
}

fn confidence_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn parse_raw(content: &str) -> Result<RawReply, OracleError> {
    let json = extract_json_object(content)
        .ok_or_else(|| OracleError::Parse("reply contains no JSON object".to_string()))?;
    serde_json::from_str(json).map_err(|e| OracleError::Parse(e.to_string()))
}

pub fn parse_correction(content: &str) -> Result<Correction, OracleError> {
    let raw = parse_raw(content)?;
    let name = raw
        .normalized_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| OracleError::Parse("reply has no normalized_name".to_string()))?;

    Ok(Correction {
        name,
        confidence: normalize_confidence(confidence_value(raw.confidence.as_ref())),
        reasoning: raw.reasoning.unwrap_or_default(),
    })
}

pub fn parse_code_hint(content: &str) -> Result<CodeHint, OracleError> {
    let raw = parse_raw(content)?;
    let code = raw
        .code
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OracleError::Parse("reply has no code".to_string()))?;

    Ok(CodeHint {
        code,
        confidence: normalize_confidence(confidence_value(raw.confidence.as_ref())),
        reasoning: raw.reasoning.unwrap_or_default(),
    })
}
