//! Index entries, search results, and index errors.

use crate::document::DocumentId;
use crate::embedding::EmbeddingClientError;
use crate::processing::{ChunkId, Provenance};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the embedding index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The embedding provider kept failing after the retry budget was spent.
    #[error("embedding failed after {attempts} attempt(s): {source}")]
    Embedding {
        /// Attempts performed.
        attempts: u32,
        /// Final provider error.
        #[source]
        source: EmbeddingClientError,
    },
    /// The embedding provider kept timing out.
    #[error("embedding timed out after {attempts} attempt(s)")]
    EmbeddingTimeout {
        /// Attempts performed.
        attempts: u32,
    },
    /// Snapshot storage failed; the index state for the request is unusable.
    #[error("index unavailable: {0}")]
    Unavailable(String),
    /// A vector did not match the index dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension received.
        got: usize,
    },
}

/// One stored chunk: `(chunk_id, embedding, text, provenance)` plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Chunk identifier.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Chunk sequence index within the document.
    pub sequence: usize,
    /// Verbatim chunk text.
    pub text: String,
    /// Source attribution.
    pub provenance: Provenance,
    /// Hash of `text` used for change detection.
    pub content_hash: String,
    /// Embedding vector as returned by the provider.
    pub embedding: Vec<f32>,
    /// Index-wide insertion counter; breaks similarity ties.
    pub inserted_at: u64,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    /// Matching chunk.
    pub chunk_id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Cosine similarity to the query vector.
    pub similarity: f32,
    /// Insertion counter of the entry.
    pub inserted_at: u64,
}

/// What an upsert changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Entries written by this call (new, changed, or re-embedded).
    pub written: usize,
    /// Entries left untouched because id, text, and embedding version matched.
    pub unchanged: usize,
    /// Entries removed because they were superseded.
    pub removed: usize,
}

impl UpsertSummary {
    pub(crate) fn merge(&mut self, other: UpsertSummary) {
        self.written += other.written;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
    }
}
