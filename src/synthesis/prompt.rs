//! Grounded prompt assembly.

use crate::processing::ChunkId;
use crate::processing::tokens::{TokenCounter, truncate_to_budget};
use crate::query::NormalizedQuery;
use crate::retrieval::RankedCandidate;
use std::fmt::Write;

/// Prompt text plus the chunk ids it actually contains.
#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    /// Prompt sent to the generation provider.
    pub text: String,
    /// Ids of the passages included, in rank order.
    pub supplied: Vec<ChunkId>,
}

/// Render `candidates` (rank order) into a prompt, spending at most `budget` tokens on passages.
///
/// A passage that does not fit whole is cut at a word boundary; passages after it are dropped.
pub fn build_prompt(
    query: &NormalizedQuery,
    candidates: &[RankedCandidate],
    budget: usize,
    counter: &TokenCounter,
) -> GroundedPrompt {
    let mut passages = String::new();
    let mut supplied = Vec::new();
    let mut remaining = budget;

    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        let text = truncate_to_budget(candidate.prompt_text(), remaining, counter);
        if text.is_empty() {
            break;
        }
        remaining = remaining.saturating_sub(counter.as_ref()(text));
        let page = candidate
            .provenance
            .first_page
            .map_or_else(|| "n/a".to_string(), |page| page.to_string());
        let _ = writeln!(
            passages,
            "[{}] (page {page})\n{text}\n",
            candidate.chunk_id
        );
        supplied.push(candidate.chunk_id.clone());
    }

    let mut facts = String::new();
    for (slot, value) in &query.entities {
        let _ = writeln!(facts, "- {}: {value}", slot.as_str());
    }
    if facts.is_empty() {
        facts.push_str("- none\n");
    }

    let text = format!(
        "You answer questions about policy and contract documents using ONLY the passages below.\n\
         Each passage starts with its id in square brackets.\n\n\
         QUESTION: {question}\n\n\
         EXTRACTED DETAILS:\n{facts}\n\
         PASSAGES:\n{passages}\
         INSTRUCTIONS:\n\
         1. Base every statement on the passages; never rely on outside knowledge.\n\
         2. Cite the id of every passage you rely on in supporting_chunk_ids.\n\
         3. Use APPROVED or REJECTED when the question asks whether something is allowed or \
         payable, INFO_ONLY when it asks for information, and INSUFFICIENT_EVIDENCE when the \
         passages do not answer it.\n\
         4. Report an amount only when a passage states it.\n\n\
         Return ONLY a JSON object of the form:\n\
         {{\"decision\": \"APPROVED\" | \"REJECTED\" | \"INFO_ONLY\" | \"INSUFFICIENT_EVIDENCE\", \
         \"answer\": \"...\", \"amount\": number or null, \"confidence\": number between 0 and 1, \
         \"supporting_chunk_ids\": [\"passage id\", ...]}}\n",
        question = query.raw_text.trim(),
    );

    GroundedPrompt { text, supplied }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use crate::processing::Provenance;
    use crate::processing::tokens::whitespace_token_counter;

    fn candidate(id: &str, text: &str, rank: usize) -> RankedCandidate {
        RankedCandidate {
            chunk_id: ChunkId::from_raw(id),
            document_id: DocumentId::new("policy"),
            text: text.to_string(),
            provenance: Provenance {
                start: 0,
                end: text.len(),
                first_page: Some(2),
                last_page: Some(2),
                first_paragraph: None,
                last_paragraph: None,
            },
            similarity_score: 0.5,
            lexical_score: 0.5,
            fused_score: 0.5,
            rank,
            context: None,
        }
    }

    #[test]
    fn passages_appear_in_rank_order_with_ids() {
        let query = NormalizedQuery::passthrough("What is the grace period?");
        let prompt = build_prompt(
            &query,
            &[
                candidate("policy#00004", "Grace period is thirty days.", 1),
                candidate("policy#00001", "Premiums are due yearly.", 2),
            ],
            100,
            &whitespace_token_counter(),
        );
        let first = prompt.text.find("[policy#00004] (page 2)").expect("first passage");
        let second = prompt.text.find("[policy#00001]").expect("second passage");
        assert!(first < second);
        assert!(prompt.text.contains("QUESTION: What is the grace period?"));
        assert_eq!(prompt.supplied.len(), 2);
    }

    #[test]
    fn budget_truncates_and_drops_passages() {
        let query = NormalizedQuery::passthrough("q");
        let prompt = build_prompt(
            &query,
            &[
                candidate("p#00000", "one two three four five six", 1),
                candidate("p#00001", "seven eight", 2),
            ],
            4,
            &whitespace_token_counter(),
        );
        assert!(prompt.text.contains("one two three four\n"));
        assert!(!prompt.text.contains("five"));
        assert_eq!(prompt.supplied, vec![ChunkId::from_raw("p#00000")]);
    }

    #[test]
    fn neighbour_context_is_shown_under_the_retrieved_id() {
        let query = NormalizedQuery::passthrough("What is the grace period?");
        let mut widened = candidate("p#00001", "Grace period is thirty days.", 1);
        widened.context = Some(
            "Premiums are due yearly.\nGrace period is thirty days.\nLate fees apply after.".into(),
        );
        let prompt = build_prompt(&query, &[widened], 100, &whitespace_token_counter());

        assert!(prompt.text.contains(
            "[p#00001] (page 2)\nPremiums are due yearly.\nGrace period is thirty days.\nLate fees"
        ));
        assert_eq!(prompt.supplied, vec![ChunkId::from_raw("p#00001")]);
    }
}
