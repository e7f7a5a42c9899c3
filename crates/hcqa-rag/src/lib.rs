//! HCQA RAG - streaming ingestion and retrieval-augmented answering
//!
//! This crate wires the pieces together:
//! - Document store and single-writer ingestion over a bounded channel
//! - JSON Lines source with streaming (follow) mode
//! - Retry and cache policies around embedding and model calls
//! - The query pipeline: embed, k-NN lookup, prompt, model
//!
//! Author: hephaex@gmail.com

pub mod cache;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod policy;
pub mod prompt;
pub mod store;

pub use cache::{
    with_cache, CacheManager, CacheStats, CacheStatsReport, EmbeddingCache, ResponseCache,
    TextCache,
};
pub use ingest::{
    parse_json_lines, IngestHandle, IngestReport, Ingestor, JsonLinesSource, ParsedLines,
    SourceReport,
};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use pipeline::QueryPipeline;
pub use policy::{
    embedder_with_policies, llm_with_policies, CachingEmbedder, CachingLlm, RetryingEmbedder,
    RetryingLlm,
};
pub use prompt::{build_prompt, NO_CONTEXT_ANSWER};
pub use store::DocumentStore;

use hcqa_core::{AppConfig, HcqaError, LlmClient, Result, RetryPolicy};
use hcqa_vector::{create_embedding_client, CompactionPolicy, EmbeddingClient, VectorIndex};
use std::sync::Arc;
use std::time::Duration;

/// Everything a front end needs to ingest and answer
#[derive(Clone)]
pub struct HcqaService {
    pub pipeline: QueryPipeline,
    pub ingest: IngestHandle,
    pub store: Arc<DocumentStore>,
    pub index: Arc<VectorIndex>,
    pub caches: CacheManager,
}

impl HcqaService {
    /// Build the service with provider clients selected by `config`.
    ///
    /// The returned [`Ingestor`] must be spawned for documents to appear.
    pub fn from_config(config: &AppConfig) -> Result<(Self, Ingestor)> {
        let embedder = create_embedding_client(&config.embedding)?;
        let llm = create_llm_client(&config.llm)?;
        Self::with_clients(config, embedder, llm)
    }

    /// Build the service around the given provider adapters
    pub fn with_clients(
        config: &AppConfig,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
    ) -> Result<(Self, Ingestor)> {
        if embedder.dimension() != config.embedding.dimension {
            return Err(HcqaError::Config(format!(
                "embedder {} produces {} dimensions, configured {}",
                embedder.model(),
                embedder.dimension(),
                config.embedding.dimension
            )));
        }

        let caches = CacheManager::from_config(&config.cache);
        let retry = RetryPolicy::from_config(&config.retry);

        let embedder = embedder_with_policies(
            embedder,
            retry.with_attempt_timeout(Duration::from_secs(config.embedding.timeout_secs)),
            caches.embedding.clone(),
        );
        let llm = llm_with_policies(
            llm,
            retry.with_attempt_timeout(Duration::from_secs(config.llm.timeout_secs)),
            caches.response.clone(),
        );

        let store = Arc::new(DocumentStore::new());
        let index = Arc::new(VectorIndex::new(
            config.embedding.dimension,
            config.retrieval.metric,
            CompactionPolicy::from_config(&config.index),
        ));

        let (ingest, ingestor) = ingest::channel(
            &config.ingest,
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&index),
        );

        let pipeline = QueryPipeline::new(embedder, Arc::clone(&index), llm, &config.retrieval)
            .with_timeout(config.server.request_timeout());

        tracing::info!(
            dimension = config.embedding.dimension,
            metric = %config.retrieval.metric,
            top_k = config.retrieval.top_k,
            "HCQA service assembled"
        );

        Ok((
            Self {
                pipeline,
                ingest,
                store,
                index,
                caches,
            },
            ingestor,
        ))
    }
}
