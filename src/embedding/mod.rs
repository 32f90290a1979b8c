//! Embedding providers.
//!
//! The default provider is an in-process feature-hashing embedder, which is deterministic and
//! needs no network. An Ollama adapter is available for real embedding models. Every client
//! reports a version string; the index re-embeds stored chunks when it changes.

mod ollama;

pub use ollama::OllamaEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use crate::text::content_terms;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or reported a transient failure.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded or had the wrong shape.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingClientError {
    /// Embedding calls are idempotent, so everything except a rejected request may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::GenerationFailed(_))
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Identifier of the embedding function; changes whenever vectors would change.
    fn version(&self) -> &str;

    /// Length of every produced vector.
    fn dimension(&self) -> usize;

    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic embedder hashing content terms and adjacent term pairs into signed buckets.
///
/// Texts sharing no content terms have zero cosine similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingClient {
    dimension: usize,
    version: String,
}

impl HashingEmbeddingClient {
    /// Create an embedder producing vectors of `dimension` (at least 1) components.
    pub fn new(model: &str, dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            version: format!("hashing:{model}:{dimension}"),
        }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        let terms = content_terms(text);

        for term in &terms {
            self.accumulate(&mut embedding, term, 1.0);
        }
        for pair in terms.windows(2) {
            self.accumulate(&mut embedding, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }

    fn accumulate(&self, embedding: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        embedding[bucket] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    fn version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::trace!(count = texts.len(), dimension = self.dimension, "Hashing embeddings");
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

/// Build the embedding client selected by `config`.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    match config.embedding_provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbeddingClient::new(
            &config.embedding_model,
            config.embedding_dimension,
        ))),
        EmbeddingProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Arc::new(OllamaEmbeddingClient::new(
                base_url,
                config.embedding_model.clone(),
                config.embedding_dimension,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn hashing_embeddings_are_normalized_and_stable() {
        let client = HashingEmbeddingClient::new("test", 64);
        let first = client
            .generate_embeddings(vec!["grace period for premium".into()])
            .await
            .expect("embeddings");
        let second = client
            .generate_embeddings(vec!["grace period for premium".into()])
            .await
            .expect("embeddings");
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 64);
        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn related_texts_score_higher_than_unrelated() {
        let client = HashingEmbeddingClient::new("test", 384);
        let vectors = client
            .generate_embeddings(vec![
                "What is the grace period?".into(),
                "A grace period of thirty days is allowed for premium payment.".into(),
                "Maternity expenses are excluded.".into(),
            ])
            .await
            .expect("embeddings");
        assert!(cosine(&vectors[0], &vectors[1]) > cosine(&vectors[0], &vectors[2]));
    }

    #[tokio::test]
    async fn stopword_only_text_embeds_to_zero() {
        let client = HashingEmbeddingClient::new("test", 16);
        let vectors = client
            .generate_embeddings(vec!["what is the".into()])
            .await
            .expect("embeddings");
        assert!(vectors[0].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn version_tracks_model_and_dimension() {
        assert_ne!(
            HashingEmbeddingClient::new("a", 8).version(),
            HashingEmbeddingClient::new("a", 16).version()
        );
    }

    #[test]
    fn only_rejections_are_final() {
        assert!(EmbeddingClientError::ProviderUnavailable("x".into()).is_retryable());
        assert!(!EmbeddingClientError::GenerationFailed("x".into()).is_retryable());
    }
}
