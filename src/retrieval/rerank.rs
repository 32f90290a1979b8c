//! Second-stage scoring of merged vector-search candidates.

use super::RankedCandidate;
use crate::document::DocumentId;
use crate::processing::{ChunkId, Provenance};
use crate::query::{NormalizedQuery, Slot};
use crate::text::term_set;
use std::cmp::Ordering;

/// Merged vector-search hit awaiting reranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Chunk identifier.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Chunk text as stored in the index.
    pub text: String,
    /// Where the chunk came from.
    pub provenance: Provenance,
    /// Best cosine similarity observed across search strings.
    pub similarity: f32,
}

/// Reorders candidates by a finer-grained relevance score.
pub trait Reranker: Send + Sync {
    /// Score and sort `candidates`, best first. Ranks are assigned by the caller.
    fn rerank(&self, query: &NormalizedQuery, candidates: Vec<Candidate>) -> Vec<RankedCandidate>;
}

/// Weighted fusion of vector similarity and keyword overlap.
///
/// `fused = similarity_weight * max(similarity, 0) + lexical_weight * lexical`, where `lexical` is
/// the share of query keywords found in the chunk, plus a bonus when the requested fact appears
/// verbatim, capped at 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalFusionReranker {
    /// Weight of the vector similarity.
    pub similarity_weight: f32,
    /// Weight of the lexical overlap.
    pub lexical_weight: f32,
}

const PHRASE_BONUS: f32 = 0.2;

impl LexicalFusionReranker {
    /// Reranker with the given fusion weights; negative weights are treated as zero.
    pub fn new(similarity_weight: f32, lexical_weight: f32) -> Self {
        Self {
            similarity_weight: similarity_weight.max(0.0),
            lexical_weight: lexical_weight.max(0.0),
        }
    }

    /// Keyword overlap between `query` and `text`, in `[0, 1]`.
    pub fn lexical_score(query: &NormalizedQuery, text: &str) -> f32 {
        if query.keywords.is_empty() {
            return 0.0;
        }
        let terms = term_set(text);
        let shared = query
            .keywords
            .iter()
            .filter(|keyword| terms.contains(*keyword))
            .count();
        let mut score = shared as f32 / query.keywords.len() as f32;

        if let Some(fact) = query.entity(Slot::RequestedFact) {
            let fact = fact.to_string().to_lowercase();
            if !fact.is_empty() && text.to_lowercase().contains(&fact) {
                score += PHRASE_BONUS;
            }
        }
        score.min(1.0)
    }

    fn fuse(&self, similarity: f32, lexical: f32) -> f32 {
        self.similarity_weight * similarity.max(0.0) + self.lexical_weight * lexical
    }
}

impl Reranker for LexicalFusionReranker {
    fn rerank(&self, query: &NormalizedQuery, candidates: Vec<Candidate>) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let lexical = Self::lexical_score(query, &candidate.text);
                RankedCandidate {
                    fused_score: self.fuse(candidate.similarity, lexical),
                    lexical_score: lexical,
                    similarity_score: candidate.similarity,
                    chunk_id: candidate.chunk_id,
                    document_id: candidate.document_id,
                    text: candidate.text,
                    provenance: candidate.provenance,
                    rank: 0,
                    context: None,
                }
            })
            .collect();
        ranked.sort_by(compare_ranked);
        ranked
    }
}

/// Fused score descending, then similarity descending, then chunk id ascending.
pub(crate) fn compare_ranked(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.similarity_score.total_cmp(&a.similarity_score))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
