use std::sync::Arc;

use clausewise::document::{Document, DocumentId, TextSegment};
use clausewise::embedding::HashingEmbeddingClient;
use clausewise::index::EmbeddingIndex;
use clausewise::pipeline::{PipelineError, QaApi, QaService};
use clausewise::processing::ChunkingConfig;
use clausewise::retrieval::RetrievalConfig;
use clausewise::retry::RetryPolicy;
use clausewise::synthesis::{DecisionLabel, SynthesisConfig};

fn policy() -> Document {
    let segment = |text: &str, page: u32, paragraph: u32| TextSegment {
        text: text.to_string(),
        page: Some(page),
        paragraph: Some(paragraph),
    };
    Document {
        id: DocumentId::new("health-policy"),
        segments: vec![
            segment(
                "Section 1. The policy is renewable every year. Premiums are payable annually.",
                1,
                1,
            ),
            segment(
                "Section 2. A grace period of thirty days is allowed for premium payment. \
                 Coverage continues during the grace period.",
                2,
                1,
            ),
            segment(
                "Section 3. Cataract surgery has a waiting period of two years. \
                 Maternity expenses are excluded during the first two years.",
                3,
                1,
            ),
            segment(
                "Section 4. Room rent is limited to one percent of the sum insured per day.",
                4,
                1,
            ),
        ],
    }
}

fn service() -> QaService {
    let index = Arc::new(EmbeddingIndex::new(
        Arc::new(HashingEmbeddingClient::new("integration", 4096)),
        RetryPolicy::immediate(1),
    ));
    QaService::new(
        index,
        ChunkingConfig::sentences(1, 0),
        RetrievalConfig::default(),
        SynthesisConfig::default(),
    )
}

#[tokio::test]
async fn reingesting_unchanged_document_is_idempotent() {
    let service = service();
    let document = policy();
    let first = service.ingest(&document).await.expect("first ingest");
    let len_after_first = service.index().view().len();

    let second = service.ingest(&document).await.expect("second ingest");
    assert_eq!(second.written, 0);
    assert_eq!(second.unchanged, first.chunks);
    assert_eq!(second.generation, first.generation);
    assert_eq!(service.index().view().len(), len_after_first);
}

#[tokio::test]
async fn chunks_cover_the_whole_document() {
    let service = service();
    let document = policy();
    service.ingest(&document).await.expect("ingest");
    let (text, _) = document.assemble();

    let view = service.index().view();
    let mut entries = view.entries(&document.id);
    entries.sort_by_key(|entry| entry.sequence);
    assert!(!entries.is_empty());
    assert_eq!(entries[0].provenance.start, 0);
    assert_eq!(entries[entries.len() - 1].provenance.end, text.len());
    for pair in entries.windows(2) {
        assert!(pair[1].provenance.start <= pair[0].provenance.end);
    }
}

#[tokio::test]
async fn grace_period_question_is_answered_from_its_clause() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");
    let document_id = DocumentId::new("health-policy");

    let decision = service
        .answer(&document_id, "What is the grace period for premium payment?")
        .await
        .expect("decision");

    assert_eq!(decision.decision_label, DecisionLabel::InfoOnly);
    assert!(decision.answer_text.contains("thirty days"));
    assert_eq!(decision.supporting_chunk_ids.len(), 1);

    let view = service.index().view();
    let cited = view
        .entry(&decision.supporting_chunk_ids[0])
        .expect("cited chunk is indexed");
    assert!(cited.text.contains("thirty days"));
    assert_eq!(cited.provenance.first_page, Some(2));
    assert_eq!(decision.referenced_clauses[0].page, Some(2));
    assert!(decision.confidence > 0.0 && decision.confidence <= 1.0);
}

#[tokio::test]
async fn every_citation_refers_to_an_indexed_chunk_of_the_document() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");
    let document_id = DocumentId::new("health-policy");
    let view = service.index().view();

    for question in [
        "Is cataract surgery covered in the first two years?",
        "What is the room rent limit?",
        "Are maternity expenses covered?",
    ] {
        let decision = service.answer(&document_id, question).await.expect("decision");
        for chunk_id in &decision.supporting_chunk_ids {
            let entry = view.entry(chunk_id).expect("cited chunk exists");
            assert_eq!(entry.document_id, document_id);
        }
        if decision.decision_label != DecisionLabel::InsufficientEvidence {
            assert!(!decision.supporting_chunk_ids.is_empty());
        }
    }
}

#[tokio::test]
async fn answers_are_deterministic() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");
    let document_id = DocumentId::new("health-policy");
    let question = "Is there a waiting period for cataract surgery?";

    let first = service.answer(&document_id, question).await.expect("decision");
    for _ in 0..3 {
        let again = service.answer(&document_id, question).await.expect("decision");
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn absent_fact_yields_insufficient_evidence() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");

    let decision = service
        .answer(
            &DocumentId::new("health-policy"),
            "Which airline lounge vouchers accompany platinum credit cards?",
        )
        .await
        .expect("decision");
    assert_eq!(decision.decision_label, DecisionLabel::InsufficientEvidence);
    assert!(decision.supporting_chunk_ids.is_empty());
    assert_eq!(decision.confidence, 0.0);
}

#[tokio::test]
async fn absent_fact_sharing_common_words_yields_insufficient_evidence() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");

    let decision = service
        .answer(
            &DocumentId::new("health-policy"),
            "Does the policy cover dental implants?",
        )
        .await
        .expect("decision");
    assert_eq!(decision.decision_label, DecisionLabel::InsufficientEvidence);
    assert!(decision.supporting_chunk_ids.is_empty());
    assert!(decision.referenced_clauses.is_empty());
}

#[tokio::test]
async fn empty_index_yields_insufficient_evidence() {
    let decision = service()
        .answer_any("What is the grace period?")
        .await
        .expect("decision");
    assert_eq!(decision.decision_label, DecisionLabel::InsufficientEvidence);
}

#[tokio::test]
async fn batch_answers_follow_question_order() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");
    let questions = vec![
        "What is the room rent limit?".to_string(),
        "What is the grace period for premium payment?".to_string(),
        "Which airline lounge vouchers accompany platinum credit cards?".to_string(),
    ];

    let decisions = QaApi::answer_batch(&service, &DocumentId::new("health-policy"), questions.clone())
        .await
        .expect("batch");
    let asked: Vec<&str> = decisions.iter().map(|d| d.question.as_str()).collect();
    assert_eq!(asked, questions.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(
        decisions[2].decision_label,
        DecisionLabel::InsufficientEvidence
    );
}

#[tokio::test]
async fn removed_documents_are_unknown() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");
    let document_id = DocumentId::new("health-policy");

    assert!(service.remove_document(&document_id).await.expect("remove"));
    assert!(!service.remove_document(&document_id).await.expect("remove again"));
    let error = service
        .answer(&document_id, "What is the grace period?")
        .await
        .expect_err("unknown document");
    assert!(matches!(error, PipelineError::UnknownDocument(_)));
}

#[tokio::test]
async fn superseding_a_document_retires_old_chunks() {
    let service = service();
    service.ingest(&policy()).await.expect("ingest");
    let revised = Document::from_text(
        "health-policy",
        "A grace period of fifteen days is allowed for premium payment.",
    );
    let ack = service.ingest(&revised).await.expect("re-ingest");
    assert!(ack.removed > 0);

    let decision = service
        .answer(
            &DocumentId::new("health-policy"),
            "What is the grace period for premium payment?",
        )
        .await
        .expect("decision");
    assert!(decision.answer_text.contains("fifteen days"));
    assert_eq!(service.metrics_snapshot().documents_ingested, 2);
}
