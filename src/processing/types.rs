//! Core data types and error definitions for chunking.

use crate::document::DocumentId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// The document text was empty or whitespace only.
    #[error("document '{0}' has no text to chunk")]
    EmptyInput(DocumentId),
    /// Chunk geometry cannot be satisfied (zero size, or overlap not smaller than size).
    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),
}

/// Unit in which chunk size and overlap are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    /// Word tokens; chunks end on sentence boundaries whenever a sentence fits the budget.
    Tokens,
    /// Whole sentences.
    Sentences,
}

/// Chunk geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Unit used by `chunk_size` and `overlap`.
    pub unit: ChunkUnit,
    /// Maximum units per chunk.
    pub chunk_size: usize,
    /// Units shared by consecutive chunks. Must be smaller than `chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            unit: ChunkUnit::Tokens,
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Sentence-based geometry.
    pub fn sentences(chunk_size: usize, overlap: usize) -> Self {
        Self {
            unit: ChunkUnit::Sentences,
            chunk_size,
            overlap,
        }
    }

    /// Token-based geometry.
    pub fn tokens(chunk_size: usize, overlap: usize) -> Self {
        Self {
            unit: ChunkUnit::Tokens,
            chunk_size,
            overlap,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Stable chunk identifier derived from the document id and the chunk's sequence index.
///
/// The index is zero-padded to five digits, so lexical order matches sequence order for the first
/// 100 000 chunks of a document. Beyond that the id stays unique but stops sorting by sequence;
/// code that needs document order sorts on the entry's `sequence` instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Derive the id of chunk `index` of `document_id`.
    pub fn new(document_id: &DocumentId, index: usize) -> Self {
        Self(format!("{document_id}#{index:05}"))
    }

    /// Wrap an id received from outside (e.g. a model response) for set lookups.
    pub fn from_raw(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a chunk came from inside the assembled document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Inclusive start byte offset into the assembled text.
    pub start: usize,
    /// Exclusive end byte offset into the assembled text.
    pub end: usize,
    /// First page touched by the chunk.
    pub first_page: Option<u32>,
    /// Last page touched by the chunk.
    pub last_page: Option<u32>,
    /// First paragraph touched by the chunk.
    pub first_paragraph: Option<u32>,
    /// Last paragraph touched by the chunk.
    pub last_paragraph: Option<u32>,
}

/// A bounded, overlapping segment of document text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier.
    pub id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Sequence index within the document.
    pub index: usize,
    /// Chunk text, trimmed. Never empty.
    pub text: String,
    /// Source range and page attribution.
    pub provenance: Provenance,
    /// SHA-256 of `text`, hex encoded.
    pub content_hash: String,
    /// Embedding vector, filled in by the index on upsert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Compute a deterministic digest of chunk text for change detection.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_sort_in_sequence_order() {
        let doc = DocumentId::new("policy");
        let ids: Vec<_> = [0, 9, 10, 123].iter().map(|i| ChunkId::new(&doc, *i)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids[2].as_str(), "policy#00010");
    }

    #[test]
    fn chunk_ids_past_five_digits_stay_unique() {
        let doc = DocumentId::new("policy");
        let last_padded = ChunkId::new(&doc, 99_999);
        let widened = ChunkId::new(&doc, 100_000);
        assert_eq!(widened.as_str(), "policy#100000");
        assert_ne!(last_padded, widened);
        assert_ne!(widened, ChunkId::new(&doc, 10_000));
    }

    #[test]
    fn config_validation_rejects_impossible_geometry() {
        assert!(ChunkingConfig::tokens(0, 0).validate().is_err());
        assert!(ChunkingConfig::sentences(2, 2).validate().is_err());
        assert!(ChunkingConfig::sentences(2, 1).validate().is_ok());
    }

    #[test]
    fn chunk_hash_is_stable() {
        assert_eq!(compute_chunk_hash("alpha"), compute_chunk_hash("alpha"));
        assert_ne!(compute_chunk_hash("alpha"), compute_chunk_hash("beta"));
        assert_eq!(compute_chunk_hash("alpha").len(), 64);
    }
}
