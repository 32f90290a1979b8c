#![deny(missing_docs)]

//! Core library for clause-grounded question answering over unstructured documents.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Document model and loading collaborators.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Generation client abstraction and adapters.
pub mod generation;
/// Embedding index over chunk vectors.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Question-answering service wiring ingestion and answering.
pub mod pipeline;
/// Document chunking utilities.
pub mod processing;
/// Query understanding: slot extraction and search-string expansion.
pub mod query;
/// Candidate retrieval and reranking.
pub mod retrieval;
/// Retry with backoff for provider calls.
pub mod retry;
/// Grounded decision synthesis.
pub mod synthesis;
/// Shared text normalization helpers.
pub mod text;
