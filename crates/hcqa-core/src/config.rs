//! HCQA Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! defaults matching a single-node deployment. The resulting [`AppConfig`]
//! is immutable and handed to each component's constructor.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Retrieval parameters
    pub retrieval: RetrievalConfig,

    /// Streaming ingestion configuration
    pub ingest: IngestConfig,

    /// Vector index maintenance
    pub index: IndexConfig,

    /// Retry policy for external calls
    pub retry: RetryConfig,

    /// Cache capacities for external calls
    pub cache: CacheConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Apply environment variables on top of the current values (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Resolve the effective configuration and validate it.
    ///
    /// Order: defaults, then the TOML file at `path` (or `$HCQA_CONFIG`)
    /// when one is given, then environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("HCQA_CONFIG").map(PathBuf::from));

        let config = match path {
            Some(path) => Self::from_file(path)?.with_env_override()?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// `from_env` uses the process environment; tests pass a map.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server; the REST connector names are accepted for older .env files
        if let Some(host) = lookup("API_HOST").or_else(|| lookup("PATHWAY_REST_CONNECTOR_HOST")) {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_value("API_PORT", port)?;
        } else if let Some(port) = lookup("PATHWAY_REST_CONNECTOR_PORT") {
            self.server.port = parse_value("PATHWAY_REST_CONNECTOR_PORT", port)?;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            self.server.request_timeout_secs = parse_value("REQUEST_TIMEOUT_SECS", secs)?;
        }

        // Embedding
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dimension) = lookup("EMBEDDING_DIMENSION") {
            self.embedding.dimension = parse_value("EMBEDDING_DIMENSION", dimension)?;
        }

        // LLM
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(temperature) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("LLM_TEMPERATURE", temperature)?;
        }
        if let Some(max_tokens) = lookup("LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_value("LLM_MAX_TOKENS", max_tokens)?;
        }

        // Shared provider endpoints and credentials
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key.clone());
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.embedding.base_url = url.clone();
            self.llm.base_url = url;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.embedding.ollama_url = url.clone();
            self.llm.ollama_url = url;
        }

        // Retrieval
        if let Some(k) = lookup("RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_value("RETRIEVAL_TOP_K", k)?;
        }
        if let Some(metric) = lookup("DISTANCE_METRIC") {
            self.retrieval.metric = metric.parse()?;
        }

        // Ingestion
        if let Some(path) = lookup("DOCUMENTS_PATH") {
            self.ingest.source_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(ms) = lookup("COMMIT_INTERVAL_MS") {
            self.ingest.commit_interval_ms = parse_value("COMMIT_INTERVAL_MS", ms)?;
        }

        // Retry
        if let Some(attempts) = lookup("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_value("RETRY_MAX_ATTEMPTS", attempts)?;
        }
        if let Some(ms) = lookup("RETRY_DELAY_MS") {
            self.retry.delay_ms = parse_value("RETRY_DELAY_MS", ms)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            self.logging.json_format = parse_value("LOG_JSON", json)?;
        }

        Ok(self)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "embedding.dimension".to_string(),
                value: "0".to_string(),
            });
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retrieval.top_k".to_string(),
                value: "0".to_string(),
            });
        }
        let durations = [
            ("server.request_timeout_secs", self.server.request_timeout_secs),
            ("embedding.timeout_secs", self.embedding.timeout_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("ingest.commit_interval_ms", self.ingest.commit_interval_ms),
            ("ingest.poll_interval_ms", self.ingest.poll_interval_ms),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "llm.temperature".to_string(),
                value: self.llm.temperature.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.index.max_tombstone_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "index.max_tombstone_ratio".to_string(),
                value: self.index.max_tombstone_ratio.to_string(),
            });
        }
        if self.embedding.provider == EmbeddingProvider::OpenAI && self.embedding.api_key.is_none()
        {
            return Err(ConfigError::MissingRequired(
                "OPENAI_API_KEY (embedding provider is openai)".to_string(),
            ));
        }
        if self.llm.provider == LlmProvider::OpenAI && self.llm.api_key.is_none() {
            return Err(ConfigError::MissingRequired(
                "OPENAI_API_KEY (llm provider is openai)".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Upper bound on one query, embed + retrieve + generate
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub cors_enabled: bool,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 60,
            max_body_size: 10 * 1024 * 1024, // 10MB
            cors_enabled: true,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider to use
    pub provider: EmbeddingProvider,

    /// API key for OpenAI-compatible providers
    pub api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub base_url: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Embedding model name
    pub model: String,

    /// Vector dimension; every indexed vector has exactly this length
    pub dimension: usize,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAI,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            model: "text-embedding-ada-002".to_string(),
            dimension: 1536,
            timeout_secs: 30,
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAI,
    Ollama,
    /// Local feature-hashing embedder, no network
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// OpenAI API key
    pub api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub base_url: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 60,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Retrieval parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of documents handed to the model as context
    pub top_k: usize,

    /// Distance metric, fixed per deployment
    pub metric: DistanceMetric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// Distance between embedding vectors; smaller is nearer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// L2 distance
    #[default]
    Euclidean,
    /// 1 - cosine similarity
    Cosine,
    /// Negated inner product
    DotProduct,
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Euclidean => write!(f, "euclidean"),
            Self::Cosine => write!(f, "cosine"),
            Self::DotProduct => write!(f, "dot_product"),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            "dot_product" | "dot" => Ok(Self::DotProduct),
            _ => Err(ConfigError::InvalidValue {
                key: "DISTANCE_METRIC".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Streaming ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// JSON Lines file to ingest; `None` disables the file source
    pub source_path: Option<PathBuf>,

    /// Keep reading appended lines after reaching end of file
    pub follow: bool,

    /// Batching window: how long accepted records wait before commit
    pub commit_interval_ms: u64,

    /// How often the file source checks for appended lines
    pub poll_interval_ms: u64,

    /// Commit early once this many records are buffered
    pub max_batch_size: usize,

    /// Concurrent embedding calls per batch
    pub embed_concurrency: usize,

    /// Capacity of the ingestion command channel
    pub channel_capacity: usize,

    /// Commit cycles a record may fail embedding before it is dropped
    pub max_ingest_attempts: u32,
}

impl IngestConfig {
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_path: Some(PathBuf::from("documents.jsonl")),
            follow: true,
            commit_interval_ms: 50,
            poll_interval_ms: 200,
            max_batch_size: 256,
            embed_concurrency: 8,
            channel_capacity: 1024,
            max_ingest_attempts: 5,
        }
    }
}

/// Vector index maintenance thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Compact once a snapshot holds more segments than this
    pub max_segments: usize,

    /// Compact once tombstones exceed this fraction of entries
    pub max_tombstone_ratio: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_segments: 16,
            max_tombstone_ratio: 0.25,
        }
    }
}

/// Fixed-delay retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts (1 = no retry)
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
        }
    }
}

/// Cache capacities; `None` leaves a cache unbounded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached embeddings
    pub embedding_capacity: Option<u64>,

    /// Maximum cached model responses
    pub response_capacity: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 100k vectors @ 1536 f32 = ~600MB worst case
            embedding_capacity: Some(100_000),
            response_capacity: Some(10_000),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.ingest.commit_interval_ms, 50);
        assert_eq!(config.retrieval.metric, DistanceMetric::Euclidean);
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::default()
            .with_overrides(lookup_from(&[
                ("API_PORT", "9000"),
                ("OPENAI_API_KEY", "sk-test"),
                ("EMBEDDING_DIMENSION", "8"),
                ("LLM_TEMPERATURE", "0.5"),
                ("RETRIEVAL_TOP_K", "5"),
                ("DISTANCE_METRIC", "cosine"),
                ("COMMIT_INTERVAL_MS", "10"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.embedding.dimension, 8);
        assert_eq!(config.llm.temperature, 0.5);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.metric, DistanceMetric::Cosine);
        assert_eq!(config.ingest.commit_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_override_reports_key() {
        let err = AppConfig::default()
            .with_overrides(lookup_from(&[("API_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
    }

    #[test]
    fn test_empty_documents_path_disables_source() {
        let config = AppConfig::default()
            .with_overrides(lookup_from(&[("DOCUMENTS_PATH", "")]))
            .unwrap();
        assert!(config.ingest.source_path.is_none());
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        config.embedding.provider = EmbeddingProvider::Hashing;
        config.llm.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());

        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.llm.api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        let cases: [(&str, fn(&mut AppConfig)); 5] = [
            ("server.request_timeout_secs", |c| c.server.request_timeout_secs = 0),
            ("embedding.timeout_secs", |c| c.embedding.timeout_secs = 0),
            ("llm.timeout_secs", |c| c.llm.timeout_secs = 0),
            ("ingest.commit_interval_ms", |c| c.ingest.commit_interval_ms = 0),
            ("ingest.poll_interval_ms", |c| c.ingest.poll_interval_ms = 0),
        ];

        for (key, zero) in cases {
            let mut config = valid_config();
            zero(&mut config);
            match config.validate() {
                Err(ConfigError::InvalidValue { key: rejected, .. }) => assert_eq!(rejected, key),
                other => panic!("{key} = 0 was not rejected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_zero_commit_interval_from_env_fails_validation() {
        let config = valid_config()
            .with_overrides(lookup_from(&[("COMMIT_INTERVAL_MS", "0")]))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rest_connector_aliases() {
        let config = AppConfig::default()
            .with_overrides(lookup_from(&[
                ("PATHWAY_REST_CONNECTOR_HOST", "127.0.0.1"),
                ("PATHWAY_REST_CONNECTOR_PORT", "8000"),
            ]))
            .unwrap();
        assert_eq!(config.server.bind_address(), "127.0.0.1:8000");

        let config = AppConfig::default()
            .with_overrides(lookup_from(&[
                ("API_PORT", "9000"),
                ("PATHWAY_REST_CONNECTOR_PORT", "8000"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 3000

            [retrieval]
            top_k = 1
            metric = "dot_product"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.retrieval.top_k, 1);
        assert_eq!(config.retrieval.metric, DistanceMetric::DotProduct);
        assert_eq!(config.embedding.dimension, 1536);
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            "openai".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "Hashing".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Hashing
        );
        assert!("invalid".parse::<LlmProvider>().is_err());
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
