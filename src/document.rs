//! Documents as handed over by the loading collaborator: plain text plus structural provenance.
//!
//! File-format parsing is out of scope for this crate. A [`DocumentLoader`] produces a
//! [`Document`] made of text segments tagged with page and paragraph ids; [`Document::assemble`]
//! flattens it into one string and a [`ProvenanceMap`] that the chunker uses to attribute every
//! chunk back to its pages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Separator inserted between segments when assembling a document.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Stable identifier of an ingested document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap a raw identifier, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// One extracted run of text with its position in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSegment {
    /// Extracted plain text.
    pub text: String,
    /// 1-based page number, when the format has pages.
    #[serde(default)]
    pub page: Option<u32>,
    /// 1-based paragraph (or line group) number within the document.
    #[serde(default)]
    pub paragraph: Option<u32>,
}

/// A document ready for ingestion. Immutable once built; re-ingestion supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier.
    pub id: DocumentId,
    /// Ordered text segments.
    pub segments: Vec<TextSegment>,
}

/// Byte span of one segment inside the assembled text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpan {
    /// Inclusive start byte offset.
    pub start: usize,
    /// Exclusive end byte offset.
    pub end: usize,
    /// Page the segment came from.
    pub page: Option<u32>,
    /// Paragraph the segment came from.
    pub paragraph: Option<u32>,
}

/// Sorted, non-overlapping segment spans of an assembled document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceMap {
    spans: Vec<SegmentSpan>,
}

impl ProvenanceMap {
    /// Build a map from spans, sorting them by start offset.
    pub fn new(mut spans: Vec<SegmentSpan>) -> Self {
        spans.sort_by_key(|span| (span.start, span.end));
        Self { spans }
    }

    /// Map with a single span covering `len` bytes and no page information.
    pub fn single(len: usize) -> Self {
        Self::new(vec![SegmentSpan {
            start: 0,
            end: len,
            page: None,
            paragraph: None,
        }])
    }

    /// All spans in offset order.
    pub fn spans(&self) -> &[SegmentSpan] {
        &self.spans
    }

    /// Spans intersecting the byte range `[start, end)`.
    pub fn overlapping(&self, start: usize, end: usize) -> impl Iterator<Item = &SegmentSpan> {
        self.spans
            .iter()
            .filter(move |span| span.start < end && start < span.end)
    }
}

impl Document {
    /// Build a single-segment document from raw text.
    pub fn from_text(id: impl Into<DocumentId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            segments: vec![TextSegment {
                text: text.into(),
                page: None,
                paragraph: None,
            }],
        }
    }

    /// Join segment texts with [`SEGMENT_SEPARATOR`] and record where each one landed.
    ///
    /// Segments that are empty after trimming are skipped.
    pub fn assemble(&self) -> (String, ProvenanceMap) {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(self.segments.len());

        for segment in &self.segments {
            let trimmed = segment.text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str(SEGMENT_SEPARATOR);
            }
            let start = text.len();
            text.push_str(trimmed);
            spans.push(SegmentSpan {
                start,
                end: text.len(),
                page: segment.page,
                paragraph: segment.paragraph,
            });
        }

        (text, ProvenanceMap::new(spans))
    }
}

/// Raised when the loading collaborator cannot produce text for a source.
#[derive(Debug, Error)]
pub enum DocumentUnavailableError {
    /// The source could not be read.
    #[error("failed to read document source '{source_name}': {message}")]
    Unreadable {
        /// Source the loader was asked for.
        source_name: String,
        /// Underlying I/O or decoding failure.
        message: String,
    },
    /// The source format is not one the loader understands.
    #[error("unsupported document format for '{0}'")]
    UnsupportedFormat(String),
    /// Extraction succeeded but produced no text.
    #[error("document '{0}' contains no extractable text")]
    Empty(String),
}

/// Collaborator that turns a source reference into plain text with provenance.
pub trait DocumentLoader: Send + Sync {
    /// Load the document identified by `source`.
    fn load(&self, source: &Path) -> Result<Document, DocumentUnavailableError>;
}

/// Loader for UTF-8 text sources (`.txt`, `.md`, `.eml`).
///
/// Form feeds start a new page and blank lines start a new paragraph. The document id is the
/// file stem.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextLoader;

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "text", "md", "eml"];

impl PlainTextLoader {
    /// Split raw text into page/paragraph segments.
    pub fn segment(text: &str) -> Vec<TextSegment> {
        let mut segments = Vec::new();
        let mut paragraph = 0;

        for (page_index, page) in text.split('\u{000C}').enumerate() {
            let mut current = String::new();
            for line in page.lines() {
                if line.trim().is_empty() {
                    if !current.trim().is_empty() {
                        paragraph += 1;
                        segments.push(TextSegment {
                            text: std::mem::take(&mut current),
                            page: Some(page_index as u32 + 1),
                            paragraph: Some(paragraph),
                        });
                    }
                    continue;
                }
                if !current.is_empty() {
                    current.push('\n');
                }
                current.push_str(line);
            }
            if !current.trim().is_empty() {
                paragraph += 1;
                segments.push(TextSegment {
                    text: current,
                    page: Some(page_index as u32 + 1),
                    paragraph: Some(paragraph),
                });
            }
        }

        segments
    }
}

impl DocumentLoader for PlainTextLoader {
    fn load(&self, source: &Path) -> Result<Document, DocumentUnavailableError> {
        let source_name = source.display().to_string();
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(DocumentUnavailableError::UnsupportedFormat(source_name));
        }

        let bytes =
            std::fs::read(source).map_err(|error| DocumentUnavailableError::Unreadable {
                source_name: source_name.clone(),
                message: error.to_string(),
            })?;
        let text =
            String::from_utf8(bytes).map_err(|error| DocumentUnavailableError::Unreadable {
                source_name: source_name.clone(),
                message: error.to_string(),
            })?;

        let segments = Self::segment(&text);
        if segments.is_empty() {
            return Err(DocumentUnavailableError::Empty(source_name));
        }

        let id = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(DocumentId::new)
            .unwrap_or_else(|| DocumentId::new(&source_name));
        tracing::debug!(document_id = %id, segments = segments.len(), "Loaded text document");

        Ok(Document { id, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn assemble_records_segment_spans() {
        let document = Document {
            id: DocumentId::new("policy"),
            segments: vec![
                TextSegment {
                    text: " First clause. ".into(),
                    page: Some(1),
                    paragraph: Some(1),
                },
                TextSegment {
                    text: "   ".into(),
                    page: Some(1),
                    paragraph: Some(2),
                },
                TextSegment {
                    text: "Second clause.".into(),
                    page: Some(2),
                    paragraph: Some(3),
                },
            ],
        };

        let (text, map) = document.assemble();
        assert_eq!(text, "First clause.\n\nSecond clause.");
        let spans = map.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].start..spans[0].end], "First clause.");
        assert_eq!(&text[spans[1].start..spans[1].end], "Second clause.");
        assert_eq!(spans[1].page, Some(2));
    }

    #[test]
    fn overlapping_spans_are_found_by_range() {
        let map = ProvenanceMap::new(vec![
            SegmentSpan {
                start: 0,
                end: 10,
                page: Some(1),
                paragraph: Some(1),
            },
            SegmentSpan {
                start: 12,
                end: 20,
                page: Some(2),
                paragraph: Some(2),
            },
        ]);
        let pages: Vec<_> = map.overlapping(5, 15).map(|span| span.page).collect();
        assert_eq!(pages, vec![Some(1), Some(2)]);
        assert_eq!(map.overlapping(10, 12).count(), 0);
    }

    #[test]
    fn plain_text_segments_pages_and_paragraphs() {
        let segments = PlainTextLoader::segment("Intro line.\n\nSecond para\ncontinues.\u{000C}Page two.");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].text, "Second para\ncontinues.");
        assert_eq!(segments[1].paragraph, Some(2));
        assert_eq!(segments[2].page, Some(2));
    }

    #[test]
    fn loader_rejects_unsupported_and_empty_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("policy.pdf");
        std::fs::write(&pdf, b"%PDF").expect("write");
        assert!(matches!(
            PlainTextLoader.load(&pdf),
            Err(DocumentUnavailableError::UnsupportedFormat(_))
        ));

        let empty = dir.path().join("blank.txt");
        std::fs::write(&empty, b"  \n\n ").expect("write");
        assert!(matches!(
            PlainTextLoader.load(&empty),
            Err(DocumentUnavailableError::Empty(_))
        ));

        let missing = dir.path().join("missing.txt");
        assert!(matches!(
            PlainTextLoader.load(&missing),
            Err(DocumentUnavailableError::Unreadable { .. })
        ));
    }

    #[test]
    fn loader_uses_file_stem_as_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("health-policy.txt");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "A grace period of thirty days applies.").expect("write");

        let document = PlainTextLoader.load(&path).expect("document");
        assert_eq!(document.id.as_str(), "health-policy");
        assert_eq!(document.segments.len(), 1);
    }
}
