//! Term normalization shared by the hashing embedder, query understanding, and lexical reranking,
//! plus amount parsing used by query understanding and synthesis.

use std::collections::BTreeSet;
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at",
    "be", "been", "before", "being", "below", "between", "both", "but", "by", "can", "could",
    "did", "do", "does", "doing", "during", "each", "few", "for", "from", "further", "had", "has",
    "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "itself", "just", "me", "more", "most", "my", "no", "nor", "not", "of",
    "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own", "same",
    "shall", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours", "please", "tell", "explain",
    "describe", "also", "any", "there", "given", "mentioned", "per",
];

/// Whether `word` (already lowercased) carries no retrieval signal.
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Reduce a lowercased word to a crude stem so that plural and singular forms match.
pub fn stem(word: &str) -> String {
    let chars = word.chars().count();
    if chars > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if chars > 3 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Ordered content terms of `text`: lowercased, stemmed, stopwords and single letters dropped.
///
/// Duplicates are kept so callers can weight repeated terms.
pub fn content_terms(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|word| !is_stopword(word))
        .filter(|word| word.chars().count() > 1 || word.chars().all(|c| c.is_ascii_digit()))
        .map(|word| stem(&word))
        .collect()
}

/// Distinct content terms of `text`.
pub fn term_set(text: &str) -> BTreeSet<String> {
    content_terms(text).into_iter().collect()
}

const CURRENCY_MARKERS: &[&str] = &["rs.", "rs", "inr", "usd", "₹", "$"];

/// Parse a monetary amount such as `Rs. 1,50,000`, `₹5000.50`, `$ 1,200` or `2500 rupees`.
///
/// Thousands separators (Western or Indian grouping) are ignored. Returns `None` when no number
/// is present or when more than one number remains after stripping currency markers.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut value = raw.trim().to_lowercase();
    for suffix in ["rupees", "rupee", "dollars", "dollar", "/-"] {
        if let Some(stripped) = value.strip_suffix(suffix) {
            value = stripped.trim_end().to_string();
        }
    }
    for marker in CURRENCY_MARKERS {
        if let Some(stripped) = value.strip_prefix(marker) {
            value = stripped.trim_start().to_string();
            break;
        }
    }
    for marker in CURRENCY_MARKERS {
        if let Some(stripped) = value.strip_suffix(marker) {
            value = stripped.trim_end().to_string();
            break;
        }
    }
    let digits: String = value.chars().filter(|c| *c != ',' && *c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    digits.parse::<f64>().ok().filter(|amount| amount.is_finite())
}
