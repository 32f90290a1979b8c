use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and question answering.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_indexed: AtomicU64,
    questions_answered: AtomicU64,
    insufficient_evidence: AtomicU64,
    timeouts: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document and the number of chunks written for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an answered question and whether evidence was insufficient.
    pub fn record_answer(&self, insufficient: bool) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
        if insufficient {
            self.insufficient_evidence.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request that exceeded its deadline.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            insufficient_evidence: self.insufficient_evidence.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Documents ingested since startup.
    pub documents_ingested: u64,
    /// Chunk entries written to the index since startup.
    pub chunks_indexed: u64,
    /// Questions answered with a decision.
    pub questions_answered: u64,
    /// Decisions labelled insufficient evidence.
    pub insufficient_evidence: u64,
    /// Requests that exceeded their deadline.
    pub timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
    }

    #[test]
    fn records_answers_and_timeouts() {
        let metrics = PipelineMetrics::new();
        metrics.record_answer(false);
        metrics.record_answer(true);
        metrics.record_timeout();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.questions_answered, 2);
        assert_eq!(snapshot.insufficient_evidence, 1);
        assert_eq!(snapshot.timeouts, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
