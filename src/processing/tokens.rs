//! Token counting for prompt budgets.
//!
//! Prefers a `tiktoken-rs` encoding resolved from the model name and falls back to a whitespace
//! counter when the model is unknown to tiktoken (common for locally served Ollama models).

use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, r50k_base};

/// Shared token counting function.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Build a token counter for `model`, falling back to whitespace counting.
pub fn build_token_counter(model: Option<&str>) -> TokenCounter {
    let target = model.map(str::trim).filter(|m| !m.is_empty()).unwrap_or("cl100k_base");
    match resolve_encoding(target) {
        Some(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        None => {
            tracing::warn!(
                model = target,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            whitespace_token_counter()
        }
    }
}

/// Counter that treats every whitespace-separated word as one token.
pub fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| segment.split_whitespace().count())
}

fn resolve_encoding(model: &str) -> Option<CoreBPE> {
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Some(encoding);
    }
    let by_name = match model {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "r50k_base" | "gpt2" => r50k_base(),
        _ => {
            tracing::debug!(model, "Unknown tokenizer model; using 'cl100k_base'");
            cl100k_base()
        }
    };
    by_name.ok()
}

/// Longest prefix of `text` (cut at a whitespace boundary) whose token count fits `budget`.
pub fn truncate_to_budget<'a>(text: &'a str, budget: usize, counter: &TokenCounter) -> &'a str {
    if counter.as_ref()(text) <= budget {
        return text;
    }
    let mut fitted = "";
    for (offset, _) in text.match_indices(char::is_whitespace) {
        let candidate = text[..offset].trim_end();
        if counter.as_ref()(candidate) > budget {
            break;
        }
        fitted = candidate;
    }
    fitted
}
