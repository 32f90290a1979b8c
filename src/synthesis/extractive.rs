//! Generation-free synthesis: answer with the best-matching retrieved sentence.

use crate::processing::ChunkId;
use crate::processing::segment::sentence_spans;
use crate::query::NormalizedQuery;
use crate::retrieval::RankedCandidate;
use crate::text::term_set;

/// Sentence chosen as the extractive answer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Extract {
    pub(crate) chunk_id: ChunkId,
    pub(crate) sentence: String,
    /// Share of query keywords present in the sentence.
    pub(crate) overlap: f32,
}

/// Terms naming the document itself; they match almost any clause, so they do not count towards
/// answer overlap.
const DOCUMENT_TERMS: &[&str] = &[
    "policy", "plan", "document", "contract", "clause", "insurance", "insured", "insurer",
];

/// Highest-overlap sentence across `candidates`; earlier ranks and sentences win ties.
///
/// Overlap is the share of the query's discriminating keywords found in the sentence, where
/// document terms are left out unless the query has nothing else. `None` when no sentence reaches
/// `min_overlap` or shares any term with the query.
pub(crate) fn best_sentence(
    query: &NormalizedQuery,
    candidates: &[RankedCandidate],
    min_overlap: f32,
) -> Option<Extract> {
    let mut keywords: Vec<&String> = query
        .keywords
        .iter()
        .filter(|keyword| !DOCUMENT_TERMS.contains(&keyword.as_str()))
        .collect();
    if keywords.is_empty() {
        keywords = query.keywords.iter().collect();
    }
    if keywords.is_empty() {
        return None;
    }

    let mut best: Option<Extract> = None;
    for candidate in candidates {
        for span in sentence_spans(&candidate.text) {
            let sentence = candidate.text[span].trim();
            let terms = term_set(sentence);
            let shared = keywords
                .iter()
                .filter(|keyword| terms.contains(keyword.as_str()))
                .count();
            if shared == 0 {
                continue;
            }
            let overlap = shared as f32 / keywords.len() as f32;
            if best.as_ref().is_none_or(|current| overlap > current.overlap) {
                best = Some(Extract {
                    chunk_id: candidate.chunk_id.clone(),
                    sentence: sentence.to_string(),
                    overlap,
                });
            }
        }
    }
    best.filter(|extract| extract.overlap >= min_overlap)
}
