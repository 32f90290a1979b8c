//! Candidate retrieval and reranking.
//!
//! Every search string of a [`NormalizedQuery`] is embedded in one batch and searched against a
//! single [`IndexView`], over-fetching `overfetch_factor * top_k` hits per string. Hits are merged
//! by chunk id keeping the best similarity, rescored by a [`Reranker`], filtered by the minimum
//! relevance threshold and truncated to `top_k`.

pub mod rerank;

pub use rerank::{Candidate, LexicalFusionReranker, Reranker};

use crate::document::DocumentId;
use crate::index::{EmbeddingIndex, IndexError, IndexView, SearchMatch};
use crate::processing::{ChunkId, Provenance};
use crate::query::NormalizedQuery;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tuning knobs for candidate fetching and score fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Number of candidates returned by `retrieve`.
    pub top_k: usize,
    /// Over-fetch factor applied per search string; at least 3.
    pub overfetch_factor: usize,
    /// Search strings embedded per query.
    pub max_search_strings: usize,
    /// Weight of vector similarity in the fused score.
    pub similarity_weight: f32,
    /// Weight of lexical overlap in the fused score.
    pub lexical_weight: f32,
    /// Candidates whose fused score falls below this are dropped.
    pub min_relevance: f32,
    /// Adjacent chunks on each side joined into a candidate's prompt context; 0 disables it.
    pub context_neighbors: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            overfetch_factor: 4,
            max_search_strings: 3,
            similarity_weight: 0.7,
            lexical_weight: 0.3,
            min_relevance: 0.15,
            context_neighbors: 0,
        }
    }
}

impl RetrievalConfig {
    /// Clamp values into their valid ranges.
    pub fn normalized(self) -> Self {
        Self {
            overfetch_factor: self.overfetch_factor.max(3),
            max_search_strings: self.max_search_strings.max(1),
            similarity_weight: self.similarity_weight.max(0.0),
            lexical_weight: self.lexical_weight.max(0.0),
            ..self
        }
    }
}

/// A reranked chunk handed to decision synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// Chunk identifier.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Verbatim chunk text.
    pub text: String,
    /// Source attribution.
    pub provenance: Provenance,
    /// Best cosine similarity observed across search strings.
    pub similarity_score: f32,
    /// Keyword overlap with the query.
    pub lexical_score: f32,
    /// Weighted combination of similarity and lexical overlap.
    pub fused_score: f32,
    /// 1-based position in the final ordering.
    pub rank: usize,
    /// `text` widened with neighbouring chunks of the same document, in sequence order. Only
    /// used to give a generator surrounding context; citations still name `chunk_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl RankedCandidate {
    /// Text to show a generator for this candidate.
    pub fn prompt_text(&self) -> &str {
        self.context.as_deref().unwrap_or(&self.text)
    }
}

/// Fetches and reranks candidates from the embedding index.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
}

impl Retriever {
    /// Retriever using lexical fusion with the weights from `config`.
    pub fn new(index: Arc<EmbeddingIndex>, config: RetrievalConfig) -> Self {
        let config = config.normalized();
        let reranker = Arc::new(LexicalFusionReranker::new(
            config.similarity_weight,
            config.lexical_weight,
        ));
        Self {
            index,
            reranker,
            config,
        }
    }

    /// Swap in a different reranking strategy.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Best `top_k` candidates across all indexed documents.
    pub async fn retrieve(
        &self,
        query: &NormalizedQuery,
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>, IndexError> {
        self.retrieve_scoped(None, query, top_k).await
    }

    /// Best `top_k` candidates, optionally restricted to one document.
    ///
    /// Returns fewer than `top_k` candidates when fewer are available or relevant, and an empty
    /// sequence for an empty index.
    pub async fn retrieve_scoped(
        &self,
        document_id: Option<&DocumentId>,
        query: &NormalizedQuery,
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>, IndexError> {
        let view = self.index.view();
        let searchable = match document_id {
            Some(document_id) => view.contains_document(document_id),
            None => !view.is_empty(),
        };
        if top_k == 0 || !searchable {
            tracing::debug!(document_id = ?document_id, top_k, "Nothing to retrieve");
            return Ok(Vec::new());
        }

        let strings: Vec<String> = query
            .search_strings
            .iter()
            .take(self.config.max_search_strings)
            .cloned()
            .collect();
        let vectors = self.index.embed(strings).await?;

        let fetch = top_k.saturating_mul(self.config.overfetch_factor);
        let mut best: BTreeMap<ChunkId, SearchMatch> = BTreeMap::new();
        for vector in &vectors {
            let matches = match document_id {
                Some(document_id) => view.search_document(document_id, vector, fetch),
                None => view.search(vector, fetch),
            };
            for hit in matches {
                match best.get_mut(&hit.chunk_id) {
                    Some(existing) if existing.similarity >= hit.similarity => {}
                    Some(existing) => *existing = hit,
                    None => {
                        best.insert(hit.chunk_id.clone(), hit);
                    }
                }
            }
        }

        let candidates = collect_candidates(&view, best.into_values());
        let fetched = candidates.len();
        let mut ranked = self.reranker.rerank(query, candidates);
        ranked.retain(|candidate| candidate.fused_score >= self.config.min_relevance);
        ranked.truncate(top_k);
        for (position, candidate) in ranked.iter_mut().enumerate() {
            candidate.rank = position + 1;
            candidate.context =
                neighbor_context(&view, &candidate.chunk_id, self.config.context_neighbors);
        }

        tracing::debug!(
            document_id = ?document_id,
            search_strings = vectors.len(),
            fetched,
            returned = ranked.len(),
            best_score = ranked.first().map(|c| c.fused_score),
            "Retrieved candidates"
        );
        Ok(ranked)
    }
}

fn neighbor_context(view: &IndexView, chunk_id: &ChunkId, radius: usize) -> Option<String> {
    if radius == 0 {
        return None;
    }
    let neighbors = view.neighbors(chunk_id, radius);
    if neighbors.len() <= 1 {
        return None;
    }
    let texts: Vec<&str> = neighbors.iter().map(|entry| entry.text.as_str()).collect();
    Some(texts.join("\n"))
}

fn collect_candidates(
    view: &IndexView,
    matches: impl Iterator<Item = SearchMatch>,
) -> Vec<Candidate> {
    matches
        .filter_map(|hit| {
            let entry = view.entry(&hit.chunk_id)?;
            Some(Candidate {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                text: entry.text.clone(),
                provenance: entry.provenance.clone(),
                similarity: hit.similarity,
            })
        })
        .collect()
}
