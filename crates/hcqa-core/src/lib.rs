//! HCQA Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout HCQA:
//! - Documents, queries and retrieval results
//! - Common error types
//! - The language-model client trait
//! - Configuration management
//! - Fixed-delay retry policy for external calls

pub mod config;
pub mod retry;

pub use config::{
    AppConfig, CacheConfig, ConfigError, DistanceMetric, EmbeddingConfig, EmbeddingProvider,
    IndexConfig, IngestConfig, LlmConfig, LlmProvider, LoggingConfig, RetrievalConfig,
    RetryConfig, ServerConfig,
};
pub use retry::{with_retry, RetryPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for HCQA operations
#[derive(Error, Debug)]
pub enum HcqaError {
    /// Malformed input record on the ingestion path
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Embedding call exhausted its retries or returned an unusable vector
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Caller supplied an argument the index or pipeline cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Language-model call exhausted its retries
    #[error("Model error: {0}")]
    Model(String),

    /// Malformed request body
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider failure worth retrying (rate limit, 5xx, connection reset)
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// Provider failure that will not succeed on retry
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A background component is not accepting work
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HcqaError {
    /// Whether a retry policy should try the operation again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Recover an error shared between the callers of a coalesced operation
    pub fn from_shared(err: Arc<HcqaError>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(|shared| match &*shared {
            Self::Ingestion(msg) => Self::Ingestion(msg.clone()),
            Self::Embedding(msg) => Self::Embedding(msg.clone()),
            Self::InvalidArgument(msg) => Self::InvalidArgument(msg.clone()),
            Self::Model(msg) => Self::Model(msg.clone()),
            Self::Transport(msg) => Self::Transport(msg.clone()),
            Self::Transient(msg) => Self::Transient(msg.clone()),
            Self::Provider(msg) => Self::Provider(msg.clone()),
            Self::Timeout(after) => Self::Timeout(*after),
            Self::NotFound(msg) => Self::NotFound(msg.clone()),
            Self::Unavailable(msg) => Self::Unavailable(msg.clone()),
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Other(e) => Self::Other(anyhow::anyhow!("{e:#}")),
        })
    }
}

impl From<ConfigError> for HcqaError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HcqaError>;

// ============================================================================
// Document Models
// ============================================================================

/// Identifier assigned to a document when it is accepted for ingestion.
///
/// Identifiers increase monotonically, so their order is the ingestion
/// order. Retrieval uses it to break distance ties.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = HcqaError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| HcqaError::InvalidArgument(format!("invalid document id: {s}")))
    }
}

/// An embedded, committed document
#[derive(Debug, Clone)]
pub struct Document {
    /// Ingestion-order identifier
    pub id: DocumentId,

    /// Original text
    pub text: String,

    /// Embedding of `text`; shared with the vector index
    pub vector: Arc<[f32]>,

    /// When the embedding was computed
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document from its text and embedding
    pub fn new(id: DocumentId, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id,
            text: text.into(),
            vector: vector.into(),
            ingested_at: Utc::now(),
        }
    }

    /// Length of the embedding vector
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// One line of the JSON Lines ingestion format: `{"doc": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc: String,
}

impl DocumentRecord {
    /// Parse a single JSON Lines record
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str::<Self>(line)
            .map_err(|e| HcqaError::Ingestion(format!("malformed record: {e}")))?
            .non_blank()
    }

    /// Check one entry of an already decoded JSON array
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value::<Self>(value)
            .map_err(|e| HcqaError::Ingestion(format!("malformed record: {e}")))?
            .non_blank()
    }

    fn non_blank(self) -> Result<Self> {
        if self.doc.trim().is_empty() {
            return Err(HcqaError::Ingestion("field `doc` is empty".to_string()));
        }
        Ok(self)
    }
}

// ============================================================================
// Query and Retrieval Types
// ============================================================================

/// Identifier of an in-flight query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A question submitted by a user. Discarded once answered.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: QueryId,
    pub text: String,
    pub user: String,

    /// Embedding of `text`, populated by the pipeline
    pub vector: Option<Vec<f32>>,
}

impl Query {
    pub fn new(text: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: QueryId::new(),
            text: text.into(),
            user: user.into(),
            vector: None,
        }
    }
}

/// A retrieved document and its distance from the query
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub document: Arc<Document>,
    pub distance: f32,
}

/// Nearest documents ordered by ascending distance, ties by ascending id
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub neighbors: Vec<Neighbor>,
}

impl RetrievalResult {
    pub fn new(neighbors: Vec<Neighbor>) -> Self {
        Self { neighbors }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.neighbors.iter()
    }

    /// Document ids in result order
    pub fn ids(&self) -> Vec<DocumentId> {
        self.neighbors.iter().map(|n| n.document.id).collect()
    }

    /// Document texts in result order
    pub fn texts(&self) -> Vec<&str> {
        self.neighbors
            .iter()
            .map(|n| n.document.text.as_str())
            .collect()
    }
}

impl IntoIterator for RetrievalResult {
    type Item = Neighbor;
    type IntoIter = std::vec::IntoIter<Neighbor>;

    fn into_iter(self) -> Self::IntoIter {
        self.neighbors.into_iter()
    }
}

/// A document that contributed context to an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub text: String,
    pub distance: f32,
}

impl From<&Neighbor> for SourceDocument {
    fn from(neighbor: &Neighbor) -> Self {
        Self {
            id: neighbor.document.id,
            text: neighbor.document.text.clone(),
            distance: neighbor.distance,
        }
    }
}

/// Pipeline output for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub query_id: QueryId,

    /// Generated answer text
    pub answer: String,

    /// Retrieved context, in prompt order
    pub sources: Vec<SourceDocument>,

    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for LLM clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response for a single-message prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}

// ============================================================================
// Tests
// ============================================================================
