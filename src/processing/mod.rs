//! Document processing: segmentation, chunking, and token budgeting.

pub mod chunking;
pub mod segment;
pub mod tokens;
pub mod types;

pub use chunking::{chunk, chunk_document};
pub use tokens::{TokenCounter, build_token_counter};
pub use types::{Chunk, ChunkId, ChunkUnit, ChunkingConfig, ChunkingError, Provenance};
