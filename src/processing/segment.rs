//! Sentence and word segmentation producing byte spans into the source text.

use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "etc", "no", "nos", "rs", "mr", "mrs", "ms", "dr", "vs", "sec", "art", "cl",
    "viz", "approx", "incl", "st", "co", "ltd", "inc",
];

/// Byte spans of the sentences in `text`, trimmed of surrounding whitespace.
///
/// A sentence ends at `.`, `!` or `?` (plus trailing closing quotes or brackets) followed by
/// whitespace, or at a blank line. A period after a known abbreviation or a single-letter
/// initial does not end a sentence.
pub fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let boundary_end = match ch {
            '.' | '!' | '?' => {
                let mut end = idx + ch.len_utf8();
                while let Some(&(next_idx, next)) = chars.peek() {
                    if matches!(next, '"' | '\'' | ')' | ']' | '”' | '’') {
                        end = next_idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let followed_by_space = text[end..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace);
                if followed_by_space && !(ch == '.' && ends_with_abbreviation(&text[start..idx])) {
                    Some(end)
                } else {
                    None
                }
            }
            '\n' => {
                let rest = &text[idx + 1..];
                let blank_line = rest
                    .find('\n')
                    .is_some_and(|pos| rest[..pos].trim().is_empty());
                blank_line.then_some(idx)
            }
            _ => None,
        };

        if let Some(end) = boundary_end {
            push_trimmed(text, start..end, &mut spans);
            start = end;
        }
    }

    push_trimmed(text, start..text.len(), &mut spans);
    spans
}

/// Byte spans of the word tokens in `text`.
pub fn word_spans(text: &str) -> Vec<Range<usize>> {
    text.unicode_word_indices()
        .map(|(offset, word)| offset..offset + word.len())
        .collect()
}

fn ends_with_abbreviation(preceding: &str) -> bool {
    let last_word = preceding
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("");
    if last_word.is_empty() {
        return false;
    }
    let lower = last_word.to_lowercase();
    if ABBREVIATIONS.contains(&lower.as_str()) {
        return true;
    }
    let mut letters = last_word.chars();
    matches!((letters.next(), letters.next()), (Some(c), None) if c.is_uppercase())
}

fn push_trimmed(text: &str, range: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let start = range.start + leading;
    spans.push(start..start + trimmed.len());
}
