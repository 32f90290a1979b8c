//! Query understanding: turns a free-text question into a [`NormalizedQuery`].
//!
//! Rule-based extraction always runs. When a generation client is configured, the model is asked
//! for the same slots as a JSON object and any values it returns override the rule-based ones.
//! Parsing never fails; the worst case is a passthrough query whose only search string is the raw
//! question.

pub mod patterns;

use crate::generation::{
    GenerationClient, GenerationClientError, GenerationConstraints, GenerationRequest,
    extract_json_object,
};
use crate::retry::RetryPolicy;
use crate::text::{parse_amount, term_set};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Named slots the understander can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Who or what the question is about ("this policy", "my spouse").
    Subject,
    /// Qualifier restricting the question ("for premium payment").
    Condition,
    /// The fact being asked for ("grace period").
    RequestedFact,
    /// A duration mentioned in the question ("30 days").
    TimeWindow,
    /// A monetary amount.
    Amount,
    /// Age of the person concerned.
    Age,
    /// Gender of the person concerned.
    Gender,
    /// Medical procedure or treatment.
    Procedure,
    /// City or region.
    Location,
    /// How long the policy has been in force.
    PolicyDuration,
}

impl Slot {
    /// Every slot, in declaration order.
    pub const ALL: [Slot; 10] = [
        Slot::Subject,
        Slot::Condition,
        Slot::RequestedFact,
        Slot::TimeWindow,
        Slot::Amount,
        Slot::Age,
        Slot::Gender,
        Slot::Procedure,
        Slot::Location,
        Slot::PolicyDuration,
    ];

    /// Wire name of the slot.
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Subject => "subject",
            Slot::Condition => "condition",
            Slot::RequestedFact => "requested_fact",
            Slot::TimeWindow => "time_window",
            Slot::Amount => "amount",
            Slot::Age => "age",
            Slot::Gender => "gender",
            Slot::Procedure => "procedure",
            Slot::Location => "location",
            Slot::PolicyDuration => "policy_duration",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase().replace([' ', '-'], "_");
        Slot::ALL.into_iter().find(|slot| slot.as_str() == key)
    }

    fn is_numeric(self) -> bool {
        matches!(self, Slot::Amount | Slot::Age)
    }
}

/// Value extracted for a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityValue {
    /// Numeric value (amounts, ages).
    Number(f64),
    /// Free-text value, lowercased unless it is a proper name.
    Text(String),
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            EntityValue::Number(value) => write!(f, "{value}"),
            EntityValue::Text(value) => f.write_str(value),
        }
    }
}

/// Structured form of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuery {
    /// Question exactly as received.
    pub raw_text: String,
    /// Extracted slot values.
    pub entities: BTreeMap<Slot, EntityValue>,
    /// Strings to embed and search with, most specific first. Never empty.
    pub search_strings: Vec<String>,
    /// Normalized content terms of the question and entity values.
    pub keywords: BTreeSet<String>,
}

impl NormalizedQuery {
    /// Query carrying no entities whose only search string is the raw question.
    pub fn passthrough(raw: &str) -> Self {
        Self {
            raw_text: raw.to_string(),
            entities: BTreeMap::new(),
            search_strings: vec![raw.to_string()],
            keywords: term_set(raw),
        }
    }

    /// Value extracted for `slot`, if any.
    pub fn entity(&self, slot: Slot) -> Option<&EntityValue> {
        self.entities.get(&slot)
    }
}

/// Extracts entities and search strings from questions.
#[derive(Clone)]
pub struct QueryUnderstander {
    generator: Option<Arc<dyn GenerationClient>>,
    model: String,
    retry: RetryPolicy,
    max_search_strings: usize,
}

impl QueryUnderstander {
    /// Rule-based understander producing at most `max_search_strings` search strings.
    pub fn new(max_search_strings: usize) -> Self {
        Self {
            generator: None,
            model: String::new(),
            retry: RetryPolicy::generation_default(),
            max_search_strings: max_search_strings.max(1),
        }
    }

    /// Also ask `generator` for slot values, using `model` and the given retry budget.
    pub fn with_generator(
        mut self,
        generator: Arc<dyn GenerationClient>,
        model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        self.generator = Some(generator);
        self.model = model.into();
        self.retry = retry;
        self
    }

    /// Normalize `raw_question`. Never fails.
    pub async fn parse(&self, raw_question: &str) -> NormalizedQuery {
        let question = raw_question.trim();
        if question.is_empty() {
            return NormalizedQuery::passthrough(raw_question);
        }

        let mut entities = patterns::extract(question);
        if let Some(extracted) = self.extract_with_model(question).await {
            entities.extend(extracted);
        }

        let search_strings = self.search_strings(question, &entities);
        let mut keywords = term_set(question);
        for value in entities.values() {
            keywords.extend(term_set(&value.to_string()));
        }

        tracing::debug!(
            question = %question,
            entities = entities.len(),
            search_strings = search_strings.len(),
            keywords = keywords.len(),
            "Parsed question"
        );

        NormalizedQuery {
            raw_text: raw_question.to_string(),
            entities,
            search_strings,
            keywords,
        }
    }

    async fn extract_with_model(&self, question: &str) -> Option<BTreeMap<Slot, EntityValue>> {
        let generator = self.generator.as_ref()?;
        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: extraction_prompt(question),
            constraints: GenerationConstraints {
                temperature: 0.0,
                max_output_tokens: 256,
                json_output: true,
            },
        };

        let completion = self
            .retry
            .run(
                "query_understanding",
                GenerationClientError::is_retryable,
                || {
                    let generator = Arc::clone(generator);
                    let request = request.clone();
                    async move { generator.generate(request).await }
                },
            )
            .await;

        match completion {
            Ok(text) => {
                let parsed = parse_model_entities(&text);
                if parsed.is_none() {
                    tracing::warn!(question = %question, "Ignoring unparseable entity extraction");
                }
                parsed
            }
            Err(error) => {
                tracing::warn!(
                    question = %question,
                    error = ?error,
                    "Entity extraction failed; using rule-based slots only"
                );
                None
            }
        }
    }

    /// Enriched query, then entity-focused strings, then the raw question.
    fn search_strings(&self, question: &str, entities: &BTreeMap<Slot, EntityValue>) -> Vec<String> {
        let text = |slot: Slot| entities.get(&slot).map(ToString::to_string);
        let mut specific = Vec::new();

        let lower = question.to_lowercase();
        let additions: Vec<String> = entities
            .values()
            .map(ToString::to_string)
            .filter(|value| !lower.contains(&value.to_lowercase()))
            .collect();
        if !additions.is_empty() {
            specific.push(format!("{question} {}", additions.join(" ")));
        }

        if let Some(fact) = text(Slot::RequestedFact) {
            match text(Slot::Condition) {
                Some(condition) => specific.push(format!("{fact} {condition}")),
                None => specific.push(fact),
            }
        }
        if let (Some(subject), Some(condition)) = (text(Slot::Subject), text(Slot::Condition)) {
            specific.push(format!("{subject} {condition}"));
        }
        if let Some(procedure) = text(Slot::Procedure) {
            specific.push(format!("{procedure} coverage"));
        }
        if let Some(duration) = text(Slot::PolicyDuration) {
            specific.push(format!("waiting period {duration} policy"));
        }

        let mut seen = HashSet::new();
        let mut strings: Vec<String> = specific
            .into_iter()
            .map(|candidate| candidate.trim().to_string())
            .filter(|candidate| !candidate.is_empty())
            .filter(|candidate| !candidate.eq_ignore_ascii_case(question))
            .filter(|candidate| seen.insert(candidate.to_lowercase()))
            .take(self.max_search_strings - 1)
            .collect();
        strings.push(question.to_string());
        strings
    }
}

fn extraction_prompt(question: &str) -> String {
    let slots: Vec<&str> = Slot::ALL.iter().map(|slot| slot.as_str()).collect();
    format!(
        "Extract structured information from the question below.\n\
         Return a single JSON object whose keys are drawn from: {}.\n\
         Use numbers for age and amount. Omit keys that the question does not mention.\n\
         Do not answer the question.\n\n\
         Question: {question}\n",
        slots.join(", ")
    )
}

/// Slot values from a model completion; `None` when no JSON object can be decoded.
fn parse_model_entities(completion: &str) -> Option<BTreeMap<Slot, EntityValue>> {
    let object = extract_json_object(completion)?;
    let Value::Object(fields) = serde_json::from_str::<Value>(object).ok()? else {
        return None;
    };

    let mut entities = BTreeMap::new();
    for (key, value) in fields {
        let Some(slot) = Slot::from_key(&key) else {
            continue;
        };
        let value = match value {
            Value::Number(number) => number.as_f64().map(EntityValue::Number),
            Value::String(text) if slot.is_numeric() => parse_amount(&text)
                .or_else(|| text.trim().parse().ok())
                .map(EntityValue::Number),
            Value::String(text) => {
                let text = text.trim();
                (!text.is_empty() && !text.eq_ignore_ascii_case("null"))
                    .then(|| EntityValue::Text(text.to_string()))
            }
            _ => None,
        };
        if let Some(value) = value {
            entities.insert(slot, value);
        }
    }
    Some(entities)
}
