//! Decision synthesis: ranked candidates in, grounded [`Decision`] out.
//!
//! With a generation client the candidates are rendered into a grounded prompt and the completion
//! is parsed against a fixed JSON contract. Without one, the best-matching retrieved sentence is
//! returned as an `INFO_ONLY` answer. Either way, every cited chunk id must be one of the ids
//! supplied to synthesis; anything else is dropped, and a decision left without citations
//! degrades to `INSUFFICIENT_EVIDENCE`.

mod extractive;
pub mod parse;
pub mod prompt;
mod types;

pub use types::{ClauseReference, Decision, DecisionLabel};

use crate::generation::{
    DEFAULT_GENERATION_MODEL, GenerationClient, GenerationClientError, GenerationConstraints,
    GenerationRequest,
};
use crate::processing::ChunkId;
use crate::processing::tokens::{TokenCounter, build_token_counter};
use crate::query::NormalizedQuery;
use crate::retrieval::RankedCandidate;
use crate::retry::{RetryError, RetryPolicy};
use std::sync::Arc;

const EXCERPT_CHARS: usize = 500;

/// Prompt budget and generation constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    /// Token budget for passage text in the prompt.
    pub context_token_budget: usize,
    /// Generation model; also selects the tokenizer used for the budget.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Share of the question's keywords an extractive answer sentence must contain.
    pub min_answer_overlap: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            context_token_budget: 3000,
            model: None,
            temperature: 0.1,
            max_output_tokens: 512,
            min_answer_overlap: 0.5,
        }
    }
}

/// Builds decisions from ranked candidates.
#[derive(Clone)]
pub struct DecisionSynthesizer {
    generator: Option<Arc<dyn GenerationClient>>,
    retry: RetryPolicy,
    config: SynthesisConfig,
    counter: TokenCounter,
}

impl DecisionSynthesizer {
    /// Extractive synthesizer; add a model with [`DecisionSynthesizer::with_generator`].
    pub fn new(config: SynthesisConfig) -> Self {
        let counter = build_token_counter(config.model.as_deref());
        Self {
            generator: None,
            retry: RetryPolicy::generation_default(),
            config,
            counter,
        }
    }

    /// Generate decisions with `generator`, retrying transient failures per `retry`.
    pub fn with_generator(
        mut self,
        generator: Arc<dyn GenerationClient>,
        retry: RetryPolicy,
    ) -> Self {
        self.generator = Some(generator);
        self.retry = retry;
        self
    }

    /// Synthesize a decision for `query` from `candidates` (rank order, best first).
    ///
    /// Never fails: provider errors and nonconforming output degrade to
    /// [`DecisionLabel::InsufficientEvidence`].
    pub async fn synthesize(
        &self,
        query: &NormalizedQuery,
        candidates: &[RankedCandidate],
    ) -> Decision {
        let question = query.raw_text.trim();
        if candidates.is_empty() {
            tracing::info!(question = %question, "No relevant passages; insufficient evidence");
            return Decision::insufficient(
                question,
                query.entities.clone(),
                "no relevant passages were retrieved",
            );
        }

        let decision = match &self.generator {
            Some(generator) => self.generate(generator, query, candidates).await,
            None => self.extract(query, candidates),
        };
        tracing::debug!(
            question = %question,
            label = %decision.decision_label,
            supporting = decision.supporting_chunk_ids.len(),
            confidence = decision.confidence,
            "Synthesized decision"
        );
        decision
    }

    fn extract(&self, query: &NormalizedQuery, candidates: &[RankedCandidate]) -> Decision {
        let question = query.raw_text.trim();
        let min_overlap = self.config.min_answer_overlap.clamp(0.0, 1.0);
        let Some(extract) = extractive::best_sentence(query, candidates, min_overlap) else {
            tracing::warn!(question = %question, "No retrieved sentence matches the question");
            return Decision::insufficient(
                question,
                query.entities.clone(),
                "no retrieved passage addresses the question's terms",
            );
        };
        let supporting = vec![extract.chunk_id];
        let (referenced_clauses, best_score) = clauses(candidates, &supporting);
        Decision {
            question: question.to_string(),
            answer_text: extract.sentence,
            decision_label: DecisionLabel::InfoOnly,
            amount: None,
            supporting_chunk_ids: supporting,
            confidence: extract.overlap.min(best_score).clamp(0.0, 1.0),
            referenced_clauses,
            entities: query.entities.clone(),
        }
    }

    async fn generate(
        &self,
        generator: &Arc<dyn GenerationClient>,
        query: &NormalizedQuery,
        candidates: &[RankedCandidate],
    ) -> Decision {
        let question = query.raw_text.trim();
        let prompt = prompt::build_prompt(
            query,
            candidates,
            self.config.context_token_budget,
            &self.counter,
        );
        let request = GenerationRequest {
            model: self
                .config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            prompt: prompt.text,
            constraints: GenerationConstraints {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                json_output: true,
            },
        };

        let completion = self
            .retry
            .run("synthesis", GenerationClientError::is_retryable, || {
                let generator = Arc::clone(generator);
                let request = request.clone();
                async move { generator.generate(request).await }
            })
            .await;
        let completion = match completion {
            Ok(completion) => completion,
            Err(error) => {
                let reason = match &error {
                    RetryError::Failed { error, attempts } => {
                        format!("generation failed after {attempts} attempt(s): {error}")
                    }
                    RetryError::TimedOut { attempts } => {
                        format!("generation timed out after {attempts} attempt(s)")
                    }
                };
                tracing::warn!(
                    question = %question,
                    reason = %reason,
                    "Degrading to insufficient evidence"
                );
                return Decision::insufficient(
                    question,
                    query.entities.clone(),
                    "the answer could not be generated",
                );
            }
        };

        let Some(parsed) = parse::parse_completion(&completion) else {
            tracing::warn!(question = %question, "Completion does not match the decision contract");
            return Decision::insufficient(
                question,
                query.entities.clone(),
                "the generated answer was not well formed",
            );
        };

        if parsed.label == DecisionLabel::InsufficientEvidence {
            return Decision::insufficient(
                question,
                query.entities.clone(),
                "the retrieved passages do not cover it",
            );
        }

        let (supporting, dropped): (Vec<ChunkId>, Vec<ChunkId>) = parsed
            .cited
            .into_iter()
            .partition(|id| prompt.supplied.contains(id));
        if !dropped.is_empty() {
            tracing::warn!(
                question = %question,
                dropped = ?dropped,
                "Dropped citations of passages that were not supplied"
            );
        }
        if supporting.is_empty() {
            tracing::warn!(question = %question, "Answer cites no supplied passage");
            return Decision::insufficient(
                question,
                query.entities.clone(),
                "the generated answer cited no retrieved passage",
            );
        }

        let supporting = in_rank_order(candidates, supporting);
        let (referenced_clauses, best_score) = clauses(candidates, &supporting);
        let confidence = parsed
            .confidence
            .unwrap_or(best_score)
            .min(best_score)
            .clamp(0.0, 1.0);
        Decision {
            question: question.to_string(),
            answer_text: parsed.answer,
            decision_label: parsed.label,
            amount: parsed.amount,
            supporting_chunk_ids: supporting,
            confidence,
            referenced_clauses,
            entities: query.entities.clone(),
        }
    }
}

fn in_rank_order(candidates: &[RankedCandidate], cited: Vec<ChunkId>) -> Vec<ChunkId> {
    candidates
        .iter()
        .map(|candidate| &candidate.chunk_id)
        .filter(|id| cited.contains(id))
        .cloned()
        .collect()
}

/// Clause references for `supporting` plus the best fused score among them.
fn clauses(candidates: &[RankedCandidate], supporting: &[ChunkId]) -> (Vec<ClauseReference>, f32) {
    let references: Vec<ClauseReference> = candidates
        .iter()
        .filter(|candidate| supporting.contains(&candidate.chunk_id))
        .map(|candidate| ClauseReference {
            chunk_id: candidate.chunk_id.clone(),
            excerpt: excerpt(&candidate.text),
            page: candidate.provenance.first_page,
            fused_score: candidate.fused_score,
        })
        .collect();
    let best = references
        .iter()
        .map(|reference| reference.fused_score)
        .fold(0.0_f32, f32::max);
    (references, best)
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}
