//! HTTP surface for the question-answering service.
//!
//! - `POST /documents` – Chunk and index a document given as raw `text` or ordered `segments`.
//!   Re-posting an id supersedes the previous version.
//! - `DELETE /documents/{id}` – Drop a document from the index.
//! - `POST /documents/{id}/answer` – Answer one question against a document.
//! - `POST /documents/{id}/answers` – Answer several questions; decisions keep input order.
//! - `GET /metrics` – Ingestion and answering counters.
//! - `GET /health` – Liveness probe.

use crate::document::{Document, DocumentId, TextSegment};
use crate::index::IndexError;
use crate::pipeline::{IngestAck, PipelineError, QaApi};
use crate::synthesis::Decision;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router over a question-answering service.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: QaApi + 'static,
{
    Router::new()
        .route("/documents", post(ingest_document::<S>))
        .route("/documents/:id", delete(remove_document::<S>))
        .route("/documents/:id/answer", post(answer_question::<S>))
        .route("/documents/:id/answers", post(answer_questions::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .with_state(service)
}

/// Request body for `POST /documents`.
#[derive(Deserialize)]
struct IngestRequest {
    /// Document identifier; re-using one supersedes the earlier version.
    id: String,
    /// Raw text, used when no segments are supplied.
    #[serde(default)]
    text: Option<String>,
    /// Pre-extracted segments with page/paragraph positions.
    #[serde(default)]
    segments: Vec<TextSegment>,
}

impl IngestRequest {
    fn into_document(self) -> Result<Document, AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::bad_request("document id must not be empty"));
        }
        if !self.segments.is_empty() {
            return Ok(Document {
                id: DocumentId::new(self.id),
                segments: self.segments,
            });
        }
        match self.text {
            Some(text) => Ok(Document::from_text(self.id, text)),
            None => Err(AppError::bad_request(
                "either `text` or `segments` is required",
            )),
        }
    }
}

/// Chunk and index a document.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestAck>, AppError>
where
    S: QaApi,
{
    let document = request.into_document()?;
    let ack = service.ingest(document).await?;
    tracing::info!(
        document_id = %ack.document_id,
        chunks = ack.chunks,
        written = ack.written,
        "Ingest request completed"
    );
    Ok(Json(ack))
}

#[derive(Serialize)]
struct RemoveResponse {
    removed: bool,
}

async fn remove_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<RemoveResponse>, AppError>
where
    S: QaApi,
{
    let removed = service.remove_document(&DocumentId::new(id)).await?;
    Ok(Json(RemoveResponse { removed }))
}

/// Request body for `POST /documents/{id}/answer`.
#[derive(Deserialize)]
struct AnswerRequest {
    question: String,
}

/// Answer a single question against one document.
async fn answer_question<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Decision>, AppError>
where
    S: QaApi,
{
    let decision = service
        .answer(&DocumentId::new(id), &request.question)
        .await?;
    Ok(Json(decision))
}

/// Request body for `POST /documents/{id}/answers`.
#[derive(Deserialize)]
struct BatchRequest {
    questions: Vec<String>,
}

#[derive(Serialize)]
struct BatchResponse {
    answers: Vec<Decision>,
}

/// Answer several questions against one document.
async fn answer_questions<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError>
where
    S: QaApi,
{
    let answers = service
        .answer_batch(&DocumentId::new(id), request.questions)
        .await?;
    Ok(Json(BatchResponse { answers }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: QaApi,
{
    Json(service.metrics_snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

enum AppError {
    Pipeline(PipelineError),
    BadRequest(String),
}

impl AppError {
    fn bad_request(message: &str) -> Self {
        Self::BadRequest(message.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Pipeline(error) => match error {
                PipelineError::Chunking(_) => StatusCode::BAD_REQUEST,
                PipelineError::UnknownDocument(_) => StatusCode::NOT_FOUND,
                PipelineError::DocumentUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Index(IndexError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::Index(_) => StatusCode::BAD_GATEWAY,
                PipelineError::Setup(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, retryable) = match &self {
            AppError::BadRequest(message) => (message.clone(), false),
            AppError::Pipeline(error) => (error.to_string(), error.is_retryable()),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        }
        (
            status,
            Json(json!({ "error": message, "retryable": retryable })),
        )
            .into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::document::{Document, DocumentId};
    use crate::metrics::MetricsSnapshot;
    use crate::pipeline::{IngestAck, PipelineError, QaApi};
    use crate::synthesis::{Decision, DecisionLabel};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubQaService {
        ingested: Mutex<Vec<Document>>,
        questions: Mutex<Vec<(DocumentId, String)>>,
        timeout: bool,
    }

    impl StubQaService {
        fn timing_out() -> Self {
            Self {
                timeout: true,
                ..Self::default()
            }
        }

        fn decision(question: &str) -> Decision {
            Decision {
                question: question.to_string(),
                answer_text: format!("answer to {question}"),
                decision_label: DecisionLabel::InfoOnly,
                amount: None,
                supporting_chunk_ids: Vec::new(),
                confidence: 0.5,
                referenced_clauses: Vec::new(),
                entities: BTreeMap::new(),
            }
        }
    }

    #[async_trait]
    impl QaApi for StubQaService {
        async fn ingest(&self, document: Document) -> Result<IngestAck, PipelineError> {
            let ack = IngestAck {
                document_id: document.id.clone(),
                chunks: document.segments.len(),
                written: document.segments.len(),
                unchanged: 0,
                removed: 0,
                generation: 1,
                ingested_at: "2024-01-01T00:00:00Z".into(),
            };
            self.ingested.lock().await.push(document);
            Ok(ack)
        }

        async fn answer(
            &self,
            document_id: &DocumentId,
            question: &str,
        ) -> Result<Decision, PipelineError> {
            if self.timeout {
                return Err(PipelineError::Timeout(Duration::from_secs(1)));
            }
            if document_id.as_str() != "policy" {
                return Err(PipelineError::UnknownDocument(document_id.clone()));
            }
            self.questions
                .lock()
                .await
                .push((document_id.clone(), question.to_string()));
            Ok(Self::decision(question))
        }

        async fn answer_batch(
            &self,
            document_id: &DocumentId,
            questions: Vec<String>,
        ) -> Result<Vec<Decision>, PipelineError> {
            let mut answers = Vec::new();
            for question in questions {
                answers.push(self.answer(document_id, &question).await?);
            }
            Ok(answers)
        }

        async fn remove_document(&self, document_id: &DocumentId) -> Result<bool, PipelineError> {
            Ok(document_id.as_str() == "policy")
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_ingested: 3,
                ..MetricsSnapshot::default()
            }
        }
    }

    async fn send(
        service: Arc<StubQaService>,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = create_router(service)
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn ingest_accepts_raw_text() {
        let service = Arc::new(StubQaService::default());
        let (status, json) = send(
            service.clone(),
            Method::POST,
            "/documents",
            Some(json!({ "id": "policy", "text": "A grace period of thirty days applies." })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["document_id"], "policy");
        assert_eq!(json["chunks"], 1);
        let ingested = service.ingested.lock().await;
        assert_eq!(ingested.len(), 1);
        assert_eq!(
            ingested[0].segments[0].text,
            "A grace period of thirty days applies."
        );
    }

    #[tokio::test]
    async fn ingest_accepts_segments_with_pages() {
        let service = Arc::new(StubQaService::default());
        let (status, _) = send(
            service.clone(),
            Method::POST,
            "/documents",
            Some(json!({
                "id": "policy",
                "segments": [
                    { "text": "Section 1. Definitions.", "page": 1 },
                    { "text": "Section 2. Grace period.", "page": 2, "paragraph": 4 }
                ]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let ingested = service.ingested.lock().await;
        assert_eq!(ingested[0].segments.len(), 2);
        assert_eq!(ingested[0].segments[1].page, Some(2));
        assert_eq!(ingested[0].segments[1].paragraph, Some(4));
    }

    #[tokio::test]
    async fn ingest_without_content_is_rejected() {
        let (status, json) = send(
            Arc::new(StubQaService::default()),
            Method::POST,
            "/documents",
            Some(json!({ "id": "policy" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["retryable"], false);
    }

    #[tokio::test]
    async fn answer_route_returns_decision() {
        let service = Arc::new(StubQaService::default());
        let (status, json) = send(
            service.clone(),
            Method::POST,
            "/documents/policy/answer",
            Some(json!({ "question": "What is the grace period?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["decision_label"], "INFO_ONLY");
        assert_eq!(json["question"], "What is the grace period?");
        let questions = service.questions.lock().await;
        assert_eq!(questions[0].0.as_str(), "policy");
    }

    #[tokio::test]
    async fn batch_route_preserves_question_order() {
        let (status, json) = send(
            Arc::new(StubQaService::default()),
            Method::POST,
            "/documents/policy/answers",
            Some(json!({ "questions": ["first?", "second?", "third?"] })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let questions: Vec<&str> = json["answers"]
            .as_array()
            .expect("answers")
            .iter()
            .map(|answer| answer["question"].as_str().expect("question"))
            .collect();
        assert_eq!(questions, vec!["first?", "second?", "third?"]);
    }

    #[tokio::test]
    async fn pipeline_errors_map_to_statuses() {
        let (status, _) = send(
            Arc::new(StubQaService::default()),
            Method::POST,
            "/documents/unknown/answer",
            Some(json!({ "question": "Anything?" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(
            Arc::new(StubQaService::timing_out()),
            Method::POST,
            "/documents/policy/answer",
            Some(json!({ "question": "Anything?" })),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["retryable"], true);
    }

    #[tokio::test]
    async fn delete_metrics_and_health_routes() {
        let service = Arc::new(StubQaService::default());
        let (status, json) = send(service.clone(), Method::DELETE, "/documents/policy", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"], true);

        let (status, json) = send(service.clone(), Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["documents_ingested"], 3);

        let (status, json) = send(service, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }
}
