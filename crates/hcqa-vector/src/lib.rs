//! HCQA Vector - embeddings and nearest-neighbor retrieval
//!
//! Provides the embedding provider adapters and the in-memory vector
//! index that the ingestion path writes and the query path reads.

pub mod distance;
pub mod embedding;
pub mod http;
pub mod index;

pub use distance::distance;
pub use embedding::{
    create_embedding_client, EmbeddingClient, HashingEmbedding, OllamaEmbedding, OpenAiEmbedding,
};
pub use index::{CommitStats, CompactionPolicy, IndexBatch, IndexSnapshot, IndexStats, VectorIndex};
