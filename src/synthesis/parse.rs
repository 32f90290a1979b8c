//! Decoding of model completions into decision fields.

use super::types::DecisionLabel;
use crate::generation::extract_json_object;
use crate::processing::ChunkId;
use crate::text::parse_amount;
use serde::Deserialize;
use serde_json::Value;

/// Fields a model completion must provide.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDecision {
    /// Reported label.
    pub label: DecisionLabel,
    /// Answer text; never empty.
    pub answer: String,
    /// Reported amount, when finite.
    pub amount: Option<f64>,
    /// Self-reported confidence, clamped to `[0, 1]`.
    pub confidence: Option<f32>,
    /// Cited passage ids in the order given, deduplicated.
    pub cited: Vec<ChunkId>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(alias = "decision_label", alias = "label")]
    decision: String,
    #[serde(alias = "answer_text", alias = "justification")]
    answer: String,
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    confidence: Value,
    #[serde(
        default,
        alias = "supporting_chunk_ids",
        alias = "referenced_sections",
        alias = "citations"
    )]
    cited: Vec<Value>,
}

/// Parse `completion` against the expected output contract; `None` when it does not conform.
pub fn parse_completion(completion: &str) -> Option<ModelDecision> {
    let object = extract_json_object(completion)?;
    let raw: RawDecision = serde_json::from_str(object).ok()?;

    let label = DecisionLabel::parse(&raw.decision)?;
    let answer = raw.answer.trim().to_string();
    if answer.is_empty() {
        return None;
    }

    let mut cited: Vec<ChunkId> = Vec::new();
    for value in &raw.cited {
        let Some(id) = value.as_str().map(clean_id).filter(|id| !id.is_empty()) else {
            continue;
        };
        let id = ChunkId::from_raw(id);
        if !cited.contains(&id) {
            cited.push(id);
        }
    }

    Some(ModelDecision {
        label,
        answer,
        amount: number(&raw.amount).filter(|amount| amount.is_finite()),
        confidence: number(&raw.confidence)
            .filter(|confidence| confidence.is_finite())
            .map(|confidence| confidence.clamp(0.0, 1.0) as f32),
        cited,
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_amount(text),
        _ => None,
    }
}

/// Strip the bracket and quote decoration models add around passage ids.
fn clean_id(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '"' | '\'' | '`'))
        .trim()
}
