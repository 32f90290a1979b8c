//! Sentence-aware chunking with exact overlap and byte-range provenance.
//!
//! The chunker works on a sequence of units (word tokens or sentences) located by byte spans in
//! the assembled document text:
//!
//! - Windows hold at most `chunk_size` units. Consecutive windows share exactly `overlap` units.
//! - In token mode a window ends on the last sentence start that fits the budget; a sentence is
//!   only split when it alone exceeds the budget.
//! - Each chunk's provenance range runs from its first unit to the start of the unit after its
//!   last one. The first range starts at offset 0 and the last ends at the text length, so the
//!   ranges cover the whole text with no gaps.

use std::collections::BTreeSet;
use std::ops::Range;

use super::segment::{sentence_spans, word_spans};
use super::types::{
    Chunk, ChunkId, ChunkUnit, ChunkingConfig, ChunkingError, Provenance, compute_chunk_hash,
};
use crate::document::{Document, DocumentId, ProvenanceMap};

/// Assemble `document` and chunk the resulting text.
pub fn chunk_document(
    document: &Document,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, ChunkingError> {
    let (text, provenance) = document.assemble();
    chunk(&document.id, &text, &provenance, config)
}

/// Split `text` into overlapping chunks attributed through `provenance`.
///
/// Deterministic for a given input and configuration. Fails only on whitespace-only text or an
/// impossible geometry.
pub fn chunk(
    document_id: &DocumentId,
    text: &str,
    provenance: &ProvenanceMap,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, ChunkingError> {
    config.validate()?;
    if text.trim().is_empty() {
        return Err(ChunkingError::EmptyInput(document_id.clone()));
    }

    let (units, boundaries) = match config.unit {
        ChunkUnit::Sentences => (sentence_spans(text), None),
        ChunkUnit::Tokens => {
            let words = word_spans(text);
            let boundaries = sentence_starts(&words, &sentence_spans(text));
            (words, Some(boundaries))
        }
    };

    let ranges: Vec<Range<usize>> = if units.is_empty() {
        vec![0..text.len()]
    } else {
        plan_windows(
            units.len(),
            config.chunk_size,
            config.overlap,
            boundaries.as_ref(),
        )
        .into_iter()
        .map(|(first, end)| byte_range(text, &units, first, end))
        .collect()
    };

    let chunks: Vec<Chunk> = ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| build_chunk(document_id, index, text, range, provenance))
        .collect();

    tracing::debug!(
        document_id = %document_id,
        unit = ?config.unit,
        chunk_size = config.chunk_size,
        overlap = config.overlap,
        units = units.len(),
        chunks = chunks.len(),
        "Chunked document"
    );
    Ok(chunks)
}

/// Word indices at which a sentence starts, plus the end sentinel.
fn sentence_starts(words: &[Range<usize>], sentences: &[Range<usize>]) -> BTreeSet<usize> {
    let mut starts = BTreeSet::new();
    let mut word = 0;
    for sentence in sentences {
        while word < words.len() && words[word].start < sentence.start {
            word += 1;
        }
        if word < words.len() && words[word].start < sentence.end {
            starts.insert(word);
        }
    }
    starts.insert(words.len());
    starts
}

/// Plan `[first, end)` unit windows. `boundaries` restricts where a window may end; `None` lets
/// every unit boundary qualify.
fn plan_windows(
    unit_count: usize,
    size: usize,
    overlap: usize,
    boundaries: Option<&BTreeSet<usize>>,
) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    let mut first = 0;
    loop {
        let limit = (first + size).min(unit_count);
        // Ending after `first + overlap` guarantees the next window starts further on.
        let end = match boundaries {
            Some(boundaries) if limit < unit_count => boundaries
                .range(first + overlap + 1..=limit)
                .next_back()
                .copied()
                .unwrap_or(limit),
            _ => limit,
        };
        windows.push((first, end));
        if end >= unit_count {
            return windows;
        }
        first = end - overlap;
    }
}

fn byte_range(text: &str, units: &[Range<usize>], first: usize, end: usize) -> Range<usize> {
    let start = if first == 0 { 0 } else { units[first].start };
    let stop = if end >= units.len() {
        text.len()
    } else {
        units[end].start
    };
    start..stop
}

fn build_chunk(
    document_id: &DocumentId,
    index: usize,
    text: &str,
    range: Range<usize>,
    provenance: &ProvenanceMap,
) -> Chunk {
    let body = text[range.clone()].trim().to_string();
    let mut pages = provenance
        .overlapping(range.start, range.end)
        .filter_map(|span| span.page);
    let first_page = pages.next();
    let last_page = pages.last().or(first_page);
    let mut paragraphs = provenance
        .overlapping(range.start, range.end)
        .filter_map(|span| span.paragraph);
    let first_paragraph = paragraphs.next();
    let last_paragraph = paragraphs.last().or(first_paragraph);

    Chunk {
        id: ChunkId::new(document_id, index),
        document_id: document_id.clone(),
        index,
        content_hash: compute_chunk_hash(&body),
        text: body,
        provenance: Provenance {
            start: range.start,
            end: range.end,
            first_page,
            last_page,
            first_paragraph,
            last_paragraph,
        },
        embedding: None,
    }
}
