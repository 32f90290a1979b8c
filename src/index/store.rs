//! Copy-on-write embedding index.
//!
//! State lives in an immutable [`Snapshot`] behind an `Arc`. Readers clone the `Arc` and search
//! without holding any lock. Writers build the next version of a single document's index off to
//! the side, persist it when snapshots are enabled, and then swap the map under a short write
//! lock. Writers for the same document are serialized; different documents proceed in parallel.

use super::hnsw::{HnswError, HnswGraph};
use super::persist::SnapshotStore;
use super::types::{IndexEntry, IndexError, SearchMatch, UpsertSummary};
use crate::document::DocumentId;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::processing::types::compute_chunk_hash;
use crate::processing::{Chunk, ChunkId};
use crate::retry::{RetryError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Index of one document's chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DocumentIndex {
    pub(crate) document_id: DocumentId,
    pub(crate) embedding_version: String,
    slots: Vec<IndexEntry>,
    live: HashMap<ChunkId, u32>,
    graph: HnswGraph,
}

impl DocumentIndex {
    fn empty(document_id: DocumentId, embedding_version: String) -> Self {
        Self {
            document_id,
            embedding_version,
            slots: Vec::new(),
            live: HashMap::new(),
            graph: HnswGraph::default(),
        }
    }

    fn live_len(&self) -> usize {
        self.live.len()
    }

    fn live_entry(&self, chunk_id: &ChunkId) -> Option<&IndexEntry> {
        self.live
            .get(chunk_id)
            .map(|slot| &self.slots[*slot as usize])
    }

    /// Live entries in slot order.
    fn live_entries(&self) -> Vec<&IndexEntry> {
        let mut slots: Vec<u32> = self.live.values().copied().collect();
        slots.sort_unstable();
        slots
            .into_iter()
            .map(|slot| &self.slots[slot as usize])
            .collect()
    }

    fn insert(&mut self, entry: IndexEntry) -> Result<(), IndexError> {
        let slot = self
            .graph
            .insert(&entry.embedding)
            .map_err(|error| match error {
                HnswError::DimensionMismatch { expected, got } => {
                    IndexError::DimensionMismatch { expected, got }
                }
                HnswError::EmptyVector => IndexError::DimensionMismatch {
                    expected: self.graph.dimension().unwrap_or_default(),
                    got: 0,
                },
            })?;
        if let Some(previous) = self.live.insert(entry.chunk_id.clone(), slot) {
            self.graph.delete(previous);
        }
        self.slots.push(entry);
        Ok(())
    }

    fn remove(&mut self, chunk_id: &ChunkId) -> bool {
        match self.live.remove(chunk_id) {
            Some(slot) => self.graph.delete(slot),
            None => false,
        }
    }

    /// Rebuild the graph from live entries once deleted slots outnumber them.
    fn compact_if_needed(&mut self) -> Result<(), IndexError> {
        if self.graph.deleted_len() <= self.graph.live_len() {
            return Ok(());
        }
        let live: Vec<IndexEntry> = self.live_entries().into_iter().cloned().collect();
        tracing::debug!(
            document_id = %self.document_id,
            live = live.len(),
            deleted = self.graph.deleted_len(),
            "Compacting document index"
        );
        let mut rebuilt = Self::empty(self.document_id.clone(), self.embedding_version.clone());
        for entry in live {
            rebuilt.insert(entry)?;
        }
        *self = rebuilt;
        Ok(())
    }

    fn search(&self, query: &[f32], top_n: usize) -> Vec<SearchMatch> {
        self.graph
            .search(query, top_n)
            .into_iter()
            .map(|(slot, similarity)| {
                let entry = &self.slots[slot as usize];
                SearchMatch {
                    chunk_id: entry.chunk_id.clone(),
                    document_id: entry.document_id.clone(),
                    similarity,
                    inserted_at: entry.inserted_at,
                }
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    generation: u64,
    documents: HashMap<DocumentId, Arc<DocumentIndex>>,
}

/// Immutable, lock-free view of the index at one generation.
#[derive(Debug, Clone)]
pub struct IndexView {
    snapshot: Arc<Snapshot>,
}

impl IndexView {
    /// Monotonic counter bumped by every published write.
    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    /// Number of live entries across all documents.
    pub fn len(&self) -> usize {
        self.snapshot
            .documents
            .values()
            .map(|document| document.live_len())
            .sum()
    }

    /// Whether the view holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed document ids in sorted order.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.snapshot.documents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `document_id` has index state.
    pub fn contains_document(&self, document_id: &DocumentId) -> bool {
        self.snapshot.documents.contains_key(document_id)
    }

    /// Live entries of one document in chunk sequence order.
    pub fn entries(&self, document_id: &DocumentId) -> Vec<&IndexEntry> {
        let mut entries = self
            .snapshot
            .documents
            .get(document_id)
            .map(|document| document.live_entries())
            .unwrap_or_default();
        entries.sort_by(|a, b| (a.sequence, &a.chunk_id).cmp(&(b.sequence, &b.chunk_id)));
        entries
    }

    /// The live entries within `radius` sequence positions of `chunk_id`, in sequence order and
    /// including the chunk itself. Empty when the chunk is not indexed.
    pub fn neighbors(&self, chunk_id: &ChunkId, radius: usize) -> Vec<&IndexEntry> {
        let Some(center) = self.entry(chunk_id) else {
            return Vec::new();
        };
        let entries = self.entries(&center.document_id);
        let Some(position) = entries.iter().position(|entry| entry.chunk_id == *chunk_id) else {
            return Vec::new();
        };
        let start = position.saturating_sub(radius);
        let end = position.saturating_add(radius).saturating_add(1).min(entries.len());
        entries[start..end].to_vec()
    }

    /// Look up a live entry by chunk id.
    pub fn entry(&self, chunk_id: &ChunkId) -> Option<&IndexEntry> {
        self.snapshot
            .documents
            .values()
            .find_map(|document| document.live_entry(chunk_id))
    }

    /// The `top_n` entries nearest to `query_vector` across all documents.
    ///
    /// Ordered by similarity descending, ties by insertion order. Empty for an empty index.
    pub fn search(&self, query_vector: &[f32], top_n: usize) -> Vec<SearchMatch> {
        let mut matches: Vec<SearchMatch> = self
            .snapshot
            .documents
            .values()
            .flat_map(|document| document.search(query_vector, top_n))
            .collect();
        sort_matches(&mut matches);
        matches.truncate(top_n);
        matches
    }

    /// Like [`IndexView::search`], restricted to one document.
    pub fn search_document(
        &self,
        document_id: &DocumentId,
        query_vector: &[f32],
        top_n: usize,
    ) -> Vec<SearchMatch> {
        let mut matches = self
            .snapshot
            .documents
            .get(document_id)
            .map(|document| document.search(query_vector, top_n))
            .unwrap_or_default();
        sort_matches(&mut matches);
        matches
    }
}

fn sort_matches(matches: &mut [SearchMatch]) {
    matches.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.inserted_at.cmp(&b.inserted_at))
    });
}

/// Held writer lock of one document. The per-document entry is evicted on drop once no other
/// writer holds or awaits it.
struct WriterLease<'a> {
    writers: &'a Mutex<HashMap<DocumentId, Arc<AsyncMutex<()>>>>,
    document_id: DocumentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriterLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        if writers
            .get(&self.document_id)
            .is_some_and(|writer| Arc::strong_count(writer) == 1)
        {
            writers.remove(&self.document_id);
        }
    }
}

/// Similarity-searchable store of chunk embeddings; the only shared state of the pipeline.
pub struct EmbeddingIndex {
    embedder: Arc<dyn EmbeddingClient>,
    retry: RetryPolicy,
    state: RwLock<Arc<Snapshot>>,
    writers: Mutex<HashMap<DocumentId, Arc<AsyncMutex<()>>>>,
    store: Option<SnapshotStore>,
    next_insert: AtomicU64,
}

impl EmbeddingIndex {
    /// In-memory index using `embedder` with the given retry budget.
    pub fn new(embedder: Arc<dyn EmbeddingClient>, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            retry,
            state: RwLock::new(Arc::new(Snapshot::default())),
            writers: Mutex::new(HashMap::new()),
            store: None,
            next_insert: AtomicU64::new(0),
        }
    }

    /// Index persisted under `dir`, restoring any snapshots found there.
    ///
    /// Documents embedded with a different embedding version are re-embedded before returning.
    pub async fn open(
        embedder: Arc<dyn EmbeddingClient>,
        retry: RetryPolicy,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, IndexError> {
        let store = SnapshotStore::open(dir.into()).await?;
        let loaded = store.load_all().await?;
        let next_insert = loaded
            .iter()
            .flat_map(|document| document.slots.iter().map(|entry| entry.inserted_at))
            .max()
            .map_or(0, |max| max + 1);

        let version = embedder.version().to_string();
        let mut stale = Vec::new();
        let mut documents = HashMap::new();
        for document in loaded {
            if document.embedding_version != version {
                stale.push(document.document_id.clone());
            }
            documents.insert(document.document_id.clone(), Arc::new(document));
        }

        let index = Self {
            state: RwLock::new(Arc::new(Snapshot {
                generation: 0,
                documents,
            })),
            store: Some(store),
            next_insert: AtomicU64::new(next_insert),
            ..Self::new(embedder, retry)
        };

        for document_id in stale {
            let chunks: Vec<Chunk> = index
                .view()
                .entries(&document_id)
                .into_iter()
                .map(entry_to_chunk)
                .collect();
            tracing::info!(
                document_id = %document_id,
                chunks = chunks.len(),
                "Re-embedding document indexed with an older embedding version"
            );
            index.replace_document(&document_id, chunks).await?;
        }
        Ok(index)
    }

    /// Version string of the embedding function in use.
    pub fn embedding_version(&self) -> &str {
        self.embedder.version()
    }

    /// Current read view. Cheap; never blocks on writers.
    pub fn view(&self) -> IndexView {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        IndexView {
            snapshot: Arc::clone(&guard),
        }
    }

    /// Shortcut for `view().search(..)`.
    pub fn search(&self, query_vector: &[f32], top_n: usize) -> Vec<SearchMatch> {
        self.view().search(query_vector, top_n)
    }

    /// Embed `texts` with the index's embedder, retrying transient failures.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, IndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let embedder = Arc::clone(&self.embedder);
        let vectors = self
            .retry
            .run("embedding", EmbeddingClientError::is_retryable, || {
                let embedder = Arc::clone(&embedder);
                let texts = texts.clone();
                async move { embedder.generate_embeddings(texts).await }
            })
            .await
            .map_err(|error| match error {
                RetryError::Failed { error, attempts } => IndexError::Embedding {
                    attempts,
                    source: error,
                },
                RetryError::TimedOut { attempts } => IndexError::EmbeddingTimeout { attempts },
            })?;

        if vectors.len() != expected {
            return Err(IndexError::Embedding {
                attempts: 1,
                source: EmbeddingClientError::InvalidResponse(format!(
                    "expected {expected} embeddings, received {}",
                    vectors.len()
                )),
            });
        }
        let dimension = self.embedder.dimension();
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: vector.len(),
            });
        }
        Ok(vectors)
    }

    /// Insert or update chunks by id.
    ///
    /// Chunks whose id, text, and embedding version match the stored entry are left untouched.
    /// Chunks without an embedding are embedded in one batch per document.
    pub async fn upsert(&self, chunks: Vec<Chunk>) -> Result<UpsertSummary, IndexError> {
        let mut by_document: BTreeMap<DocumentId, Vec<Chunk>> = BTreeMap::new();
        for chunk in chunks {
            by_document
                .entry(chunk.document_id.clone())
                .or_default()
                .push(chunk);
        }
        let mut summary = UpsertSummary::default();
        for (document_id, chunks) in by_document {
            summary.merge(self.write_document(&document_id, chunks, false).await?);
        }
        Ok(summary)
    }

    /// Make `chunks` the complete chunk set of `document_id`, removing entries not among them.
    pub async fn replace_document(
        &self,
        document_id: &DocumentId,
        chunks: Vec<Chunk>,
    ) -> Result<UpsertSummary, IndexError> {
        self.write_document(document_id, chunks, true).await
    }

    /// Drop every entry of `document_id`. Returns whether the document was indexed.
    pub async fn remove_document(&self, document_id: &DocumentId) -> Result<bool, IndexError> {
        let _lease = self.lock_document(document_id).await;
        if !self.view().contains_document(document_id) {
            return Ok(false);
        }
        self.publish(document_id, None).await?;
        tracing::info!(document_id = %document_id, "Removed document from index");
        Ok(true)
    }

    /// Serialize writers of `document_id` until the returned lease is dropped.
    async fn lock_document(&self, document_id: &DocumentId) -> WriterLease<'_> {
        let writer = {
            let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(writers.entry(document_id.clone()).or_default())
        };
        WriterLease {
            writers: &self.writers,
            document_id: document_id.clone(),
            guard: Some(writer.lock_owned().await),
        }
    }

    async fn write_document(
        &self,
        document_id: &DocumentId,
        chunks: Vec<Chunk>,
        supersede: bool,
    ) -> Result<UpsertSummary, IndexError> {
        let _lease = self.lock_document(document_id).await;

        let base = self.view().snapshot.documents.get(document_id).cloned();
        let (next, summary) = self
            .build_document(document_id, base.as_deref(), chunks, supersede)
            .await?;

        if summary.written == 0 && summary.removed == 0 {
            tracing::debug!(
                document_id = %document_id,
                unchanged = summary.unchanged,
                "Index already up to date"
            );
            return Ok(summary);
        }

        let next = (next.live_len() > 0).then(|| Arc::new(next));
        self.publish(document_id, next).await?;
        tracing::info!(
            document_id = %document_id,
            written = summary.written,
            unchanged = summary.unchanged,
            removed = summary.removed,
            "Indexed document chunks"
        );
        Ok(summary)
    }

    async fn build_document(
        &self,
        document_id: &DocumentId,
        base: Option<&DocumentIndex>,
        chunks: Vec<Chunk>,
        supersede: bool,
    ) -> Result<(DocumentIndex, UpsertSummary), IndexError> {
        let version = self.embedder.version().to_string();
        let incoming: BTreeMap<ChunkId, Chunk> = chunks
            .into_iter()
            .map(|chunk| (chunk.id.clone(), chunk))
            .collect();
        let current = base.filter(|document| document.embedding_version == version);

        let mut summary = UpsertSummary::default();
        let mut next = match current {
            Some(document) => document.clone(),
            None => DocumentIndex::empty(document_id.clone(), version),
        };
        let mut pending: Vec<(Chunk, Option<u64>)> = Vec::new();

        if let Some(base) = base {
            let absent: Vec<&IndexEntry> = base
                .live_entries()
                .into_iter()
                .filter(|entry| !incoming.contains_key(&entry.chunk_id))
                .collect();
            match (current.is_some(), supersede) {
                (true, true) => {
                    for entry in absent {
                        next.remove(&entry.chunk_id);
                        summary.removed += 1;
                    }
                }
                (true, false) => {}
                (false, true) => summary.removed = absent.len(),
                // Stale entries outside this upsert still need fresh vectors.
                (false, false) => pending.extend(
                    absent
                        .into_iter()
                        .map(|entry| (entry_to_chunk(entry), Some(entry.inserted_at))),
                ),
            }
        }

        for chunk in incoming.into_values() {
            let hash = compute_chunk_hash(&chunk.text);
            let previous = base
                .and_then(|document| document.live_entry(&chunk.id))
                .filter(|entry| entry.content_hash == hash);
            if current.is_some() && previous.is_some() {
                summary.unchanged += 1;
                continue;
            }
            pending.push((chunk, previous.map(|entry| entry.inserted_at)));
        }

        let missing: Vec<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, (chunk, _))| chunk.embedding.is_none())
            .map(|(position, _)| position)
            .collect();
        let texts = missing
            .iter()
            .map(|&position| pending[position].0.text.clone())
            .collect();
        let vectors = self.embed(texts).await?;
        for (position, vector) in missing.into_iter().zip(vectors) {
            pending[position].0.embedding = Some(vector);
        }

        pending.sort_by(|(a, a_at), (b, b_at)| {
            (a_at.is_none(), *a_at, a.index, &a.id).cmp(&(b_at.is_none(), *b_at, b.index, &b.id))
        });
        for (chunk, inserted_at) in pending {
            let embedding = chunk.embedding.unwrap_or_default();
            if embedding.len() != self.embedder.dimension() {
                return Err(IndexError::DimensionMismatch {
                    expected: self.embedder.dimension(),
                    got: embedding.len(),
                });
            }
            next.insert(IndexEntry {
                content_hash: compute_chunk_hash(&chunk.text),
                chunk_id: chunk.id,
                document_id: document_id.clone(),
                sequence: chunk.index,
                text: chunk.text,
                provenance: chunk.provenance,
                embedding,
                inserted_at: inserted_at
                    .unwrap_or_else(|| self.next_insert.fetch_add(1, Ordering::Relaxed)),
            })?;
            summary.written += 1;
        }

        next.compact_if_needed()?;
        Ok((next, summary))
    }

    async fn publish(
        &self,
        document_id: &DocumentId,
        document: Option<Arc<DocumentIndex>>,
    ) -> Result<(), IndexError> {
        if let Some(store) = &self.store {
            match &document {
                Some(document) => store.save(document).await?,
                None => store.remove(document_id).await?,
            }
        }

        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut documents = guard.documents.clone();
        match document {
            Some(document) => {
                documents.insert(document_id.clone(), document);
            }
            None => {
                documents.remove(document_id);
            }
        }
        *guard = Arc::new(Snapshot {
            generation: guard.generation + 1,
            documents,
        });
        Ok(())
    }
}

fn entry_to_chunk(entry: &IndexEntry) -> Chunk {
    Chunk {
        id: entry.chunk_id.clone(),
        document_id: entry.document_id.clone(),
        index: entry.sequence,
        text: entry.text.clone(),
        provenance: entry.provenance.clone(),
        content_hash: entry.content_hash.clone(),
        embedding: None,
    }
}
