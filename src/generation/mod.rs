//! Text generation providers used for query understanding and decision synthesis.
//!
//! Generation is optional; when no provider is configured, query understanding relies on its
//! rule-based extractor and synthesis falls back to an extractive strategy. The Ollama-backed
//! client issues HTTP requests directly to the runtime.

use crate::config::{Config, GenerationProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Model used when `GENERATION_MODEL` is not set.
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.2";

/// Errors surfaced while calling a generation provider.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider was unreachable or reported a transient failure.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request.
    #[error("Failed to generate text: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl GenerationClientError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

/// Decoding constraints attached to a generation request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConstraints {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Ask the provider to emit a single JSON object.
    pub json_output: bool,
}

impl Default for GenerationConstraints {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 512,
            json_output: true,
        }
    }
}

/// Request payload passed to a generation provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Fully assembled prompt.
    pub prompt: String,
    /// Decoding constraints.
    pub constraints: GenerationConstraints,
}

/// Interface implemented by generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for `request`.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError>;
}

/// Build the generation client selected by `config`, if any.
pub fn get_generation_client(
    config: &Config,
) -> Result<Option<Arc<dyn GenerationClient>>, GenerationClientError> {
    match config.generation_provider {
        GenerationProvider::None => Ok(None),
        GenerationProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Some(Arc::new(OllamaGenerationClient::new(base_url)?)))
        }
    }
}

/// Locate the first balanced JSON object in a model completion.
///
/// Models often wrap JSON in prose or code fences; braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Generation client backed by Ollama's `/api/generate` endpoint.
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
}

impl OllamaGenerationClient {
    /// Create a client for the runtime at `base_url`.
    pub fn new(base_url: String) -> Result<Self, GenerationClientError> {
        let http = Client::builder()
            .user_agent("clausewise/generate")
            .build()
            .map_err(|error| GenerationClientError::ProviderUnavailable(error.to_string()))?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let mut payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.constraints.temperature,
                "num_predict": request.constraints.max_output_tokens,
            }
        });
        if request.constraints.json_output {
            payload["format"] = json!("json");
        }

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GenerationClientError::GenerationFailed(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::ProviderUnavailable(format!(
                "Ollama returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "llama3".into(),
            prompt: "Answer".into(),
            constraints: GenerationConstraints::default(),
        }
    }

    #[test]
    fn extracts_object_from_fenced_prose() {
        let text = "Sure!\n```json\n{\"a\": {\"b\": \"}\"}, \"c\": 1}\n```\ntrailing }";
        assert_eq!(
            extract_json_object(text),
            Some("{\"a\": {\"b\": \"}\"}, \"c\": 1}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"open\": true"), None);
    }

    #[tokio::test]
    async fn ollama_client_requests_json_output() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url()).expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"format": "json", "stream": false}"#);
                then.status(200).json_body(json!({
                    "response": " {\"decision\": \"INFO_ONLY\"} ",
                    "done": true
                }));
            })
            .await;

        let text = client.generate(request()).await.expect("completion");

        mock.assert();
        assert_eq!(text, "{\"decision\": \"INFO_ONLY\"}");
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client.generate(request()).await.expect_err("error response");
        assert!(
            matches!(error, GenerationClientError::ProviderUnavailable(ref message) if message.contains("500"))
        );
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn incomplete_responses_are_rejected() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({"response": "{", "done": false}));
            })
            .await;

        let error = client.generate(request()).await.expect_err("incomplete");
        assert!(matches!(error, GenerationClientError::InvalidResponse(_)));
        assert!(!error.is_retryable());
    }
}
