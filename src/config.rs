use crate::processing::{ChunkUnit, ChunkingConfig};
use crate::retrieval::RetrievalConfig;
use crate::retry::RetryPolicy;
use crate::synthesis::SynthesisConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_EMBEDDING_MODEL: &str = "clausewise-hash-v1";
const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the question-answering pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Generation provider used for query understanding and decision synthesis.
    pub generation_provider: GenerationProvider,
    /// Generation model identifier passed to the provider.
    pub generation_model: Option<String>,
    /// Base URL of the Ollama runtime, when one of the providers targets it.
    pub ollama_url: Option<String>,
    /// Chunk geometry applied at ingestion time.
    pub chunking: ChunkingConfig,
    /// Candidate fetching and score fusion parameters.
    pub retrieval: RetrievalConfig,
    /// Prompt budget and generation constraints for synthesis.
    pub synthesis: SynthesisConfig,
    /// Retry policy applied to embedding calls.
    pub embedding_retry: RetryPolicy,
    /// Retry policy applied to generation calls.
    pub generation_retry: RetryPolicy,
    /// Request-scoped deadline applied to every `answer` call.
    pub request_deadline: Duration,
    /// Optional directory where index snapshots are persisted.
    pub index_snapshot_dir: Option<PathBuf>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Deterministic in-process feature hashing.
    Hashing,
    /// Local Ollama runtime.
    Ollama,
}

/// Supported generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    /// No generation model; synthesis falls back to extractive answers.
    None,
    /// Local Ollama runtime.
    Ollama,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProvider::Hashing,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            generation_provider: GenerationProvider::None,
            generation_model: None,
            ollama_url: None,
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            synthesis: SynthesisConfig::default(),
            embedding_retry: RetryPolicy::embedding_default(),
            generation_retry: RetryPolicy::generation_default(),
            request_deadline: Duration::from_secs(60),
            index_snapshot_dir: None,
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_delay = Duration::from_millis(parse_or("RETRY_BASE_DELAY_MS", 200u64)?);
        let timeout = Duration::from_millis(parse_or("PROVIDER_TIMEOUT_MS", 30_000u64)?);
        let embedding_retry = RetryPolicy::new(
            parse_or("EMBEDDING_MAX_ATTEMPTS", defaults.embedding_retry.max_attempts)?,
            base_delay,
            timeout,
        );
        let generation_retry = RetryPolicy::new(
            parse_or(
                "GENERATION_MAX_ATTEMPTS",
                defaults.generation_retry.max_attempts,
            )?,
            base_delay,
            timeout,
        );

        let chunking = ChunkingConfig {
            unit: parse_or("CHUNK_UNIT", defaults.chunking.unit)?,
            chunk_size: parse_or("CHUNK_SIZE", defaults.chunking.chunk_size)?,
            overlap: parse_or("CHUNK_OVERLAP", defaults.chunking.overlap)?,
        };

        let retrieval = RetrievalConfig {
            top_k: parse_or("RETRIEVAL_TOP_K", defaults.retrieval.top_k)?,
            overfetch_factor: parse_or("RETRIEVAL_OVERFETCH", defaults.retrieval.overfetch_factor)?,
            max_search_strings: parse_or(
                "RETRIEVAL_MAX_SEARCH_STRINGS",
                defaults.retrieval.max_search_strings,
            )?,
            similarity_weight: parse_or(
                "FUSION_SIMILARITY_WEIGHT",
                defaults.retrieval.similarity_weight,
            )?,
            lexical_weight: parse_or("FUSION_LEXICAL_WEIGHT", defaults.retrieval.lexical_weight)?,
            min_relevance: parse_or("RETRIEVAL_MIN_RELEVANCE", defaults.retrieval.min_relevance)?,
            context_neighbors: parse_or("CONTEXT_NEIGHBORS", defaults.retrieval.context_neighbors)?,
        };

        let generation_model = load_env_optional("GENERATION_MODEL");
        let synthesis = SynthesisConfig {
            context_token_budget: parse_or(
                "SYNTHESIS_CONTEXT_TOKENS",
                defaults.synthesis.context_token_budget,
            )?,
            model: generation_model.clone(),
            min_answer_overlap: parse_or(
                "EXTRACTIVE_MIN_OVERLAP",
                defaults.synthesis.min_answer_overlap,
            )?,
            ..defaults.synthesis
        };

        Ok(Self {
            embedding_provider: parse_or("EMBEDDING_PROVIDER", defaults.embedding_provider)?,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            generation_provider: parse_or("GENERATION_PROVIDER", defaults.generation_provider)?,
            generation_model,
            ollama_url: load_env_optional("OLLAMA_URL"),
            chunking,
            retrieval: retrieval.normalized(),
            synthesis,
            embedding_retry,
            generation_retry,
            request_deadline: Duration::from_millis(parse_or("REQUEST_DEADLINE_MS", 60_000u64)?),
            index_snapshot_dir: load_env_optional("INDEX_SNAPSHOT_DIR").map(PathBuf::from),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashing" | "hash" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" | "" => Ok(Self::None),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tokens" | "token" => Ok(Self::Tokens),
            "sentences" | "sentence" => Ok(Self::Sentences),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        generation_provider = ?config.generation_provider,
        chunk_unit = ?config.chunking.unit,
        chunk_size = config.chunking.chunk_size,
        chunk_overlap = config.chunking.overlap,
        snapshot_dir = ?config.index_snapshot_dir,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("Ollama".parse(), Ok(EmbeddingProvider::Ollama));
        assert_eq!("hashing".parse(), Ok(EmbeddingProvider::Hashing));
        assert!("openai".parse::<EmbeddingProvider>().is_err());
        assert_eq!("NONE".parse(), Ok(GenerationProvider::None));
        assert_eq!("sentences".parse(), Ok(ChunkUnit::Sentences));
    }

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert!(config.chunking.overlap < config.chunking.chunk_size);
        assert!(config.retrieval.overfetch_factor >= 3);
        assert!(config.embedding_retry.max_attempts > config.generation_retry.max_attempts);
        assert_eq!(config.generation_provider, GenerationProvider::None);
    }
}
