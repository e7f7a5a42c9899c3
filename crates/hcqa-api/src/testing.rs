//! Offline wiring for router tests
//!
//! Feature hashing stands in for the embedding provider and the model
//! answers with the first document of its prompt, so responses are
//! deterministic and need no network.

use crate::state::AppState;
use crate::create_router;
use async_trait::async_trait;
use axum::Router;
use hcqa_core::config::{AppConfig, EmbeddingProvider};
use hcqa_core::{LlmClient, Result};
use hcqa_rag::HcqaService;
use hcqa_vector::HashingEmbedding;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Embedding width used by the test service
pub const TEST_DIMENSION: usize = 256;

/// Answers with the first context line of the prompt
pub struct FirstDocumentLlm;

#[async_trait]
impl LlmClient for FirstDocumentLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(prompt.lines().nth(1).unwrap_or_default().to_string())
    }

    fn model(&self) -> &str {
        "first-document"
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.provider = EmbeddingProvider::Hashing;
    config.embedding.dimension = TEST_DIMENSION;
    config.retrieval.top_k = 1;
    config.ingest.commit_interval_ms = 5;
    config
}

/// State with a running ingestor; cancel the token to stop it.
///
/// Must be called inside a tokio runtime.
pub fn spawn_state() -> (Arc<AppState>, CancellationToken) {
    spawn_state_with(test_config())
}

pub fn spawn_state_with(config: AppConfig) -> (Arc<AppState>, CancellationToken) {
    let (service, ingestor) = HcqaService::with_clients(
        &config,
        Arc::new(HashingEmbedding::new(config.embedding.dimension)),
        Arc::new(FirstDocumentLlm),
    )
    .expect("test service");

    let shutdown = CancellationToken::new();
    tokio::spawn(ingestor.run(shutdown.clone()));

    (Arc::new(AppState::new(config, service)), shutdown)
}

/// Router over a fresh offline service
pub fn create_router_for_testing() -> Router {
    let (state, _shutdown) = spawn_state();
    create_router(state)
}
