//! Query pipeline
//!
//! embed query -> k-NN lookup -> prompt -> model. Each call is independent:
//! no session state, no locks held across awaits, and nothing is written
//! to the store or index.

use crate::prompt::{build_prompt, NO_CONTEXT_ANSWER};
use hcqa_core::{
    Answer, HcqaError, LlmClient, Query, Result, RetrievalConfig, RetrievalResult, SourceDocument,
};
use hcqa_vector::{EmbeddingClient, VectorIndex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Answers questions from the live index
#[derive(Clone)]
pub struct QueryPipeline {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<VectorIndex>,
    llm: Arc<dyn LlmClient>,
    top_k: usize,
    timeout: Option<Duration>,
}

impl QueryPipeline {
    /// `embedder` and `llm` should already carry their retry and cache
    /// policies.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<VectorIndex>,
        llm: Arc<dyn LlmClient>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            llm,
            top_k: config.top_k,
            timeout: None,
        }
    }

    /// Bound each whole `answer` call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer one question
    pub async fn answer(&self, text: &str, user: &str) -> Result<Answer> {
        self.answer_query(Query::new(text, user)).await
    }

    /// Answer a query whose id the caller already holds
    pub async fn answer_query(&self, query: Query) -> Result<Answer> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(query))
                .await
                .map_err(|_| HcqaError::Timeout(limit))?,
            None => self.run(query).await,
        }
    }

    /// Nearest documents for a question, without calling the model
    pub async fn retrieve(&self, text: &str) -> Result<RetrievalResult> {
        let text = validate(text)?;
        let vector = self.embedder.embed(text).await?;
        self.index.query(&vector, self.top_k)
    }

    async fn run(&self, mut query: Query) -> Result<Answer> {
        let start = Instant::now();
        query.text = validate(&query.text)?.to_string();
        info!(query_id = %query.id, user = %query.user, "Query received");

        let vector = self.embedder.embed(&query.text).await?;
        let retrieved = self.index.query(&vector, self.top_k)?;
        query.vector = Some(vector);
        debug!(query_id = %query.id, results = retrieved.len(), "Retrieved context");

        let answer = if retrieved.is_empty() {
            debug!(query_id = %query.id, "No documents indexed, skipping model call");
            NO_CONTEXT_ANSWER.to_string()
        } else {
            let prompt = build_prompt(&retrieved.texts(), &query.text);
            self.llm.generate(&prompt).await?
        };

        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(query_id = %query.id, processing_time_ms, "Query answered");

        Ok(Answer {
            query_id: query.id,
            answer,
            sources: retrieved.iter().map(SourceDocument::from).collect(),
            processing_time_ms,
        })
    }
}

fn validate(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HcqaError::InvalidArgument("query is empty".to_string()));
    }
    Ok(text)
}
