//! Question-answering service: ingestion and the per-question pipeline.
//!
//! Ingestion chunks a document and replaces its entries in the embedding index; the index
//! serializes writers per document, so concurrent ingests of one document never embed the same
//! chunks twice while different documents proceed in parallel. Answering runs query
//! understanding, retrieval and synthesis sequentially under a request-scoped deadline.

use crate::config::Config;
use crate::document::{Document, DocumentId, DocumentLoader, DocumentUnavailableError};
use crate::embedding::get_embedding_client;
use crate::generation::{DEFAULT_GENERATION_MODEL, GenerationClient, get_generation_client};
use crate::index::{EmbeddingIndex, IndexError};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::processing::{ChunkingConfig, ChunkingError, chunk_document};
use crate::query::QueryUnderstander;
use crate::retrieval::{RetrievalConfig, Retriever};
use crate::retry::RetryPolicy;
use crate::synthesis::{Decision, DecisionLabel, DecisionSynthesizer, SynthesisConfig};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::Instrument;
use uuid::Uuid;

/// Errors surfaced to the API layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document could not be chunked.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// The embedding index failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// The loading collaborator could not produce text.
    #[error(transparent)]
    DocumentUnavailable(#[from] DocumentUnavailableError),
    /// No index state exists for the requested document.
    #[error("document '{0}' has not been ingested")]
    UnknownDocument(DocumentId),
    /// The request deadline elapsed.
    #[error("request exceeded its {0:?} deadline")]
    Timeout(Duration),
    /// Providers could not be constructed from configuration.
    #[error("pipeline setup failed: {0}")]
    Setup(String),
}

impl PipelineError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Index(IndexError::Embedding { source, .. }) => source.is_retryable(),
            PipelineError::Index(IndexError::EmbeddingTimeout { .. }) => true,
            PipelineError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Acknowledgement returned by `ingest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    /// Ingested document.
    pub document_id: DocumentId,
    /// Chunks produced for the document.
    pub chunks: usize,
    /// Chunk entries written (new, changed, or re-embedded).
    pub written: usize,
    /// Chunk entries already up to date.
    pub unchanged: usize,
    /// Chunk entries retired because the new version no longer contains them.
    pub removed: usize,
    /// Index generation after the write.
    pub generation: u64,
    /// Completion time, RFC 3339.
    pub ingested_at: String,
}

/// Operations the API layer consumes.
#[async_trait]
pub trait QaApi: Send + Sync {
    /// Chunk and index `document`, superseding any previous version.
    async fn ingest(&self, document: Document) -> Result<IngestAck, PipelineError>;

    /// Answer `question` against one document.
    async fn answer(
        &self,
        document_id: &DocumentId,
        question: &str,
    ) -> Result<Decision, PipelineError>;

    /// Answer several questions; decisions come back in input order.
    async fn answer_batch(
        &self,
        document_id: &DocumentId,
        questions: Vec<String>,
    ) -> Result<Vec<Decision>, PipelineError>;

    /// Drop a document from the index. Returns whether it was present.
    async fn remove_document(&self, document_id: &DocumentId) -> Result<bool, PipelineError>;

    /// Current counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Wires chunking, the embedding index, query understanding, retrieval and synthesis together.
pub struct QaService {
    index: Arc<EmbeddingIndex>,
    chunking: ChunkingConfig,
    understander: QueryUnderstander,
    retriever: Retriever,
    synthesizer: DecisionSynthesizer,
    deadline: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl QaService {
    /// Service over `index` without a generation model.
    pub fn new(
        index: Arc<EmbeddingIndex>,
        chunking: ChunkingConfig,
        retrieval: RetrievalConfig,
        synthesis: SynthesisConfig,
    ) -> Self {
        let retrieval = retrieval.normalized();
        Self {
            understander: QueryUnderstander::new(retrieval.max_search_strings),
            retriever: Retriever::new(Arc::clone(&index), retrieval),
            synthesizer: DecisionSynthesizer::new(synthesis),
            index,
            chunking,
            deadline: Duration::from_secs(60),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Use `generator` for entity extraction and decision synthesis.
    pub fn with_generator(
        mut self,
        generator: Arc<dyn GenerationClient>,
        model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        self.understander =
            self.understander
                .with_generator(Arc::clone(&generator), model, retry);
        self.synthesizer = self.synthesizer.with_generator(generator, retry);
        self
    }

    /// Request-scoped deadline for `answer`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build providers, the index (restoring snapshots when configured) and the service.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let embedder =
            get_embedding_client(config).map_err(|error| PipelineError::Setup(error.to_string()))?;
        tracing::info!(version = embedder.version(), "Embedding client initialized");
        let index = match &config.index_snapshot_dir {
            Some(dir) => EmbeddingIndex::open(embedder, config.embedding_retry, dir).await?,
            None => EmbeddingIndex::new(embedder, config.embedding_retry),
        };

        let mut service = Self::new(
            Arc::new(index),
            config.chunking,
            config.retrieval,
            config.synthesis.clone(),
        )
        .with_deadline(config.request_deadline);

        let generator = get_generation_client(config)
            .map_err(|error| PipelineError::Setup(error.to_string()))?;
        if let Some(generator) = generator {
            let model = config
                .generation_model
                .clone()
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string());
            tracing::info!(model = %model, "Generation client initialized");
            service = service.with_generator(generator, model, config.generation_retry);
        } else {
            tracing::info!("No generation provider configured; using extractive answers");
        }
        Ok(service)
    }

    /// Shared embedding index.
    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Chunk and index `document`, superseding its previous version.
    pub async fn ingest(&self, document: &Document) -> Result<IngestAck, PipelineError> {
        let chunks = chunk_document(document, &self.chunking)?;
        let chunk_count = chunks.len();
        let summary = self.index.replace_document(&document.id, chunks).await?;
        self.metrics.record_document(summary.written as u64);

        let ack = IngestAck {
            document_id: document.id.clone(),
            chunks: chunk_count,
            written: summary.written,
            unchanged: summary.unchanged,
            removed: summary.removed,
            generation: self.index.view().generation(),
            ingested_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        tracing::info!(
            document_id = %ack.document_id,
            chunks = ack.chunks,
            written = ack.written,
            unchanged = ack.unchanged,
            removed = ack.removed,
            "Document ingested"
        );
        Ok(ack)
    }

    /// Load `source` through `loader`, then ingest it.
    pub async fn ingest_source(
        &self,
        loader: &dyn DocumentLoader,
        source: &Path,
    ) -> Result<IngestAck, PipelineError> {
        let document = loader.load(source).inspect_err(|error| {
            tracing::warn!(source = %source.display(), error = %error, "Document unavailable");
        })?;
        self.ingest(&document).await
    }

    /// Answer `question` against `document_id`.
    pub async fn answer(
        &self,
        document_id: &DocumentId,
        question: &str,
    ) -> Result<Decision, PipelineError> {
        if !self.index.view().contains_document(document_id) {
            return Err(PipelineError::UnknownDocument(document_id.clone()));
        }
        self.answer_scoped(Some(document_id), question).await
    }

    /// Answer `question` against every indexed document.
    ///
    /// An empty index yields an `INSUFFICIENT_EVIDENCE` decision rather than an error.
    pub async fn answer_any(&self, question: &str) -> Result<Decision, PipelineError> {
        self.answer_scoped(None, question).await
    }

    /// Answer `questions` concurrently, returning decisions in input order.
    pub async fn answer_batch(
        &self,
        document_id: &DocumentId,
        questions: &[String],
    ) -> Result<Vec<Decision>, PipelineError> {
        if !self.index.view().contains_document(document_id) {
            return Err(PipelineError::UnknownDocument(document_id.clone()));
        }
        let answers = questions
            .iter()
            .map(|question| self.answer_scoped(Some(document_id), question));
        join_all(answers).await.into_iter().collect()
    }

    /// Drop `document_id` from the index.
    pub async fn remove_document(&self, document_id: &DocumentId) -> Result<bool, PipelineError> {
        Ok(self.index.remove_document(document_id).await?)
    }

    /// Current counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn answer_scoped(
        &self,
        document_id: Option<&DocumentId>,
        question: &str,
    ) -> Result<Decision, PipelineError> {
        let span = tracing::info_span!(
            "answer",
            request_id = %Uuid::new_v4(),
            document_id = ?document_id.map(DocumentId::as_str),
        );
        let outcome = tokio::time::timeout(self.deadline, self.run(document_id, question))
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(decision)) => {
                self.metrics.record_answer(
                    decision.decision_label == DecisionLabel::InsufficientEvidence,
                );
                Ok(decision)
            }
            Ok(Err(error)) => Err(error),
            Err(_) => {
                self.metrics.record_timeout();
                tracing::warn!(
                    question = %question,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Request deadline exceeded"
                );
                Err(PipelineError::Timeout(self.deadline))
            }
        }
    }

    async fn run(
        &self,
        document_id: Option<&DocumentId>,
        question: &str,
    ) -> Result<Decision, PipelineError> {
        let query = self.understander.parse(question).await;
        let top_k = self.retriever.config().top_k;
        let candidates = match self
            .retriever
            .retrieve_scoped(document_id, &query, top_k)
            .await
        {
            Ok(candidates) => candidates,
            Err(error @ (IndexError::Embedding { .. } | IndexError::EmbeddingTimeout { .. })) => {
                tracing::warn!(
                    question = %question,
                    error = %error,
                    "Query embedding failed; answering without evidence"
                );
                Vec::new()
            }
            Err(error) => return Err(error.into()),
        };

        let decision = self.synthesizer.synthesize(&query, &candidates).await;
        tracing::info!(
            question = %question,
            candidates = candidates.len(),
            label = %decision.decision_label,
            supporting = decision.supporting_chunk_ids.len(),
            confidence = decision.confidence,
            "Question answered"
        );
        Ok(decision)
    }
}

#[async_trait]
impl QaApi for QaService {
    async fn ingest(&self, document: Document) -> Result<IngestAck, PipelineError> {
        QaService::ingest(self, &document).await
    }

    async fn answer(
        &self,
        document_id: &DocumentId,
        question: &str,
    ) -> Result<Decision, PipelineError> {
        QaService::answer(self, document_id, question).await
    }

    async fn answer_batch(
        &self,
        document_id: &DocumentId,
        questions: Vec<String>,
    ) -> Result<Vec<Decision>, PipelineError> {
        QaService::answer_batch(self, document_id, &questions).await
    }

    async fn remove_document(&self, document_id: &DocumentId) -> Result<bool, PipelineError> {
        QaService::remove_document(self, document_id).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        QaService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingClient;
    use crate::generation::{GenerationClientError, GenerationRequest};

    struct SlowGenerator;

    #[async_trait]
    impl GenerationClient for SlowGenerator {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<String, GenerationClientError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".into())
        }
    }

    fn service() -> QaService {
        let index = Arc::new(EmbeddingIndex::new(
            Arc::new(HashingEmbeddingClient::new("test", 1024)),
            RetryPolicy::immediate(1),
        ));
        QaService::new(
            index,
            ChunkingConfig::sentences(2, 1),
            RetrievalConfig::default(),
            SynthesisConfig::default(),
        )
    }

    #[tokio::test]
    async fn ingest_reports_counts_and_is_idempotent() {
        let service = service();
        let document = Document::from_text(
            "policy",
            "Premiums are due yearly. A grace period of thirty days applies. Claims need receipts.",
        );
        let first = service.ingest(&document).await.expect("ingest");
        assert_eq!(first.chunks, 2);
        assert_eq!(first.written, 2);

        let second = service.ingest(&document).await.expect("re-ingest");
        assert_eq!(second.written, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.generation, first.generation);
        assert_eq!(service.metrics_snapshot().documents_ingested, 2);
        assert_eq!(service.metrics_snapshot().chunks_indexed, 2);
    }

    #[tokio::test]
    async fn empty_documents_are_rejected() {
        let error = service()
            .ingest(&Document::from_text("blank", "   "))
            .await
            .expect_err("empty");
        assert!(matches!(
            error,
            PipelineError::Chunking(ChunkingError::EmptyInput(_))
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn unknown_documents_are_hard_errors() {
        let error = service()
            .answer(&DocumentId::new("missing"), "What is covered?")
            .await
            .expect_err("unknown");
        assert!(matches!(error, PipelineError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn empty_index_answers_with_insufficient_evidence() {
        let service = service();
        let decision = service
            .answer_any("What is the grace period?")
            .await
            .expect("decision");
        assert_eq!(decision.decision_label, DecisionLabel::InsufficientEvidence);
        assert_eq!(service.metrics_snapshot().insufficient_evidence, 1);
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let service = service()
            .with_generator(Arc::new(SlowGenerator), "slow", RetryPolicy::immediate(1))
            .with_deadline(Duration::from_millis(50));
        service
            .ingest(&Document::from_text("policy", "A grace period of thirty days applies."))
            .await
            .expect("ingest");

        let error = service
            .answer(&DocumentId::new("policy"), "What is the grace period?")
            .await
            .expect_err("timeout");
        assert!(matches!(error, PipelineError::Timeout(_)));
        assert!(error.is_retryable());
        assert_eq!(service.metrics_snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn unreadable_sources_surface_as_document_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = service()
            .ingest_source(&crate::document::PlainTextLoader, &dir.path().join("gone.txt"))
            .await
            .expect_err("missing file");
        assert!(matches!(error, PipelineError::DocumentUnavailable(_)));
    }
}
