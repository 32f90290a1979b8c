//! Embedding index: per-document HNSW graphs behind copy-on-write snapshots.

pub mod hnsw;
mod persist;
mod store;
mod types;

pub use store::{EmbeddingIndex, IndexView};
pub use types::{IndexEntry, IndexError, SearchMatch, UpsertSummary};
