//! Retry and cache decorators for embedding and model clients
//!
//! The provider adapters make exactly one call per request. These wrappers
//! compose around any adapter: retry innermost, cache outermost, so a
//! cached input never reaches the retry loop.

use crate::cache::{with_cache, EmbeddingCache, ResponseCache};
use async_trait::async_trait;
use futures::future::{try_join_all, FutureExt};
use hcqa_core::{with_retry, HcqaError, LlmClient, Result, RetryPolicy};
use hcqa_vector::EmbeddingClient;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors left once retries are spent, reported against the embedding step
fn embedding_failure(err: HcqaError) -> HcqaError {
    match err {
        HcqaError::Transient(msg) | HcqaError::Provider(msg) => HcqaError::Embedding(msg),
        HcqaError::Timeout(after) => {
            HcqaError::Embedding(format!("embedding timed out after {after:?}"))
        }
        other => other,
    }
}

/// Errors left once retries are spent, reported against the model step
fn model_failure(err: HcqaError) -> HcqaError {
    match err {
        HcqaError::Transient(msg) | HcqaError::Provider(msg) => HcqaError::Model(msg),
        HcqaError::Timeout(after) => HcqaError::Model(format!("model timed out after {after:?}")),
        other => other,
    }
}

// ============================================================================
// Embedding decorators
// ============================================================================

/// Retries transient embedding failures under a fixed-delay policy
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: EmbeddingClient> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<E: EmbeddingClient> EmbeddingClient for RetryingEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry(&self.policy, "embed", || self.inner.embed(text))
            .await
            .map_err(embedding_failure)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        with_retry(&self.policy, "embed_batch", || self.inner.embed_batch(texts))
            .await
            .map_err(embedding_failure)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Memoizes embeddings by exact text
pub struct CachingEmbedder<E> {
    inner: E,
    cache: EmbeddingCache,
}

impl<E: EmbeddingClient> CachingEmbedder<E> {
    pub fn new(inner: E, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<E: EmbeddingClient> EmbeddingClient for CachingEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_cache(&self.cache, text, || self.inner.embed(text)).await
    }

    /// Distinct texts missing from the cache go to the provider in one
    /// call; duplicates and concurrent lookups share that result
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for text in texts {
            if !self.cache.contains(text) && !positions.contains_key(text.as_str()) {
                positions.insert(text.as_str(), missing.len());
                missing.push(text.clone());
            }
        }

        let expected = missing.len();
        let batch = async move {
            self.inner
                .embed_batch(&missing)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        }
        .boxed()
        .shared();

        let lookups = texts.iter().map(|text| {
            let batch = batch.clone();
            let position = positions.get(text.as_str()).copied();
            with_cache(&self.cache, text, move || async move {
                let Some(i) = position else {
                    // evicted since the presence check
                    return self.inner.embed(text).await;
                };
                let vectors = batch.await.map_err(HcqaError::from_shared)?;
                if vectors.len() != expected {
                    return Err(HcqaError::Embedding(format!(
                        "requested {expected} embeddings, received {}",
                        vectors.len()
                    )));
                }
                Ok(vectors[i].clone())
            })
        });

        try_join_all(lookups).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Wrap a provider adapter in retry, then cache
pub fn embedder_with_policies(
    client: Arc<dyn EmbeddingClient>,
    policy: RetryPolicy,
    cache: EmbeddingCache,
) -> Arc<dyn EmbeddingClient> {
    Arc::new(CachingEmbedder::new(
        RetryingEmbedder::new(client, policy),
        cache,
    ))
}

// ============================================================================
// Model decorators
// ============================================================================

/// Retries transient model failures under a fixed-delay policy
pub struct RetryingLlm<L> {
    inner: L,
    policy: RetryPolicy,
}

impl<L: LlmClient> RetryingLlm<L> {
    pub fn new(inner: L, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<L: LlmClient> LlmClient for RetryingLlm<L> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        with_retry(&self.policy, "generate", || self.inner.generate(prompt))
            .await
            .map_err(model_failure)
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Memoizes responses by exact prompt
pub struct CachingLlm<L> {
    inner: L,
    cache: ResponseCache,
}

impl<L: LlmClient> CachingLlm<L> {
    pub fn new(inner: L, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<L: LlmClient> LlmClient for CachingLlm<L> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        with_cache(&self.cache, prompt, || self.inner.generate(prompt)).await
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Wrap a model adapter in retry, then cache
pub fn llm_with_policies(
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    cache: ResponseCache,
) -> Arc<dyn LlmClient> {
    Arc::new(CachingLlm::new(RetryingLlm::new(client, policy), cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails transiently `failures` times, then succeeds
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn attempt(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(HcqaError::Transient("503 Service Unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for Flaky {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.attempt()?;
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "flaky"
        }
    }

    #[async_trait]
    impl LlmClient for Flaky {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.attempt()?;
            Ok(format!("answer to {prompt}"))
        }

        fn model(&self) -> &str {
            "flaky"
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_retry_bound() {
        let flaky = Arc::new(Flaky::new(10));
        let embedder = RetryingEmbedder::new(Arc::clone(&flaky), policy(3));

        let err = embedder.embed("Aspirin").await.unwrap_err();

        assert!(matches!(err, HcqaError::Embedding(_)));
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_recovers_within_bound() {
        let flaky = Arc::new(Flaky::new(2));
        let embedder = RetryingEmbedder::new(Arc::clone(&flaky), policy(3));

        assert_eq!(embedder.embed("abc").await.unwrap(), vec![3.0, 1.0]);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_embedding_cache_idempotence() {
        let flaky = Arc::new(Flaky::new(0));
        let embedder = embedder_with_policies(
            Arc::clone(&flaky) as Arc<dyn EmbeddingClient>,
            policy(3),
            EmbeddingCache::new("embedding", None),
        );

        let first = embedder.embed("What treats headaches?").await.unwrap();
        let second = embedder.embed("What treats headaches?").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_batch_only_embeds_missing_texts() {
        let flaky = Arc::new(Flaky::new(0));
        let cache = EmbeddingCache::new("embedding", None);
        let embedder = CachingEmbedder::new(Arc::clone(&flaky), cache.clone());

        embedder.embed("a").await.unwrap();
        let texts: Vec<String> = ["a", "bb", "ccc", "bb"].map(String::from).to_vec();
        let vectors = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[0], vec![1.0, 1.0]);
        assert_eq!(vectors[2], vec![3.0, 1.0]);
        assert_eq!(vectors[1], vectors[3]);
        // one call for "a", then one per distinct missing text via the default batch impl
        assert_eq!(flaky.calls(), 3);
        assert!(cache.contains("ccc"));
    }

    /// Counts batch requests and the texts in them
    struct CountingBatch {
        batches: AtomicUsize,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for CountingBatch {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_batch_sends_distinct_misses_in_one_request() {
        let inner = Arc::new(CountingBatch {
            batches: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        });
        let embedder = embedder_with_policies(
            Arc::clone(&inner) as Arc<dyn EmbeddingClient>,
            policy(3),
            EmbeddingCache::new("embedding", None),
        );

        let texts = vec!["Aspirin treats headaches.".to_string(); 4];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![25.0]; 4]);

        embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(inner.batches.load(Ordering::SeqCst), 1);
        assert_eq!(inner.texts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_length_mismatch_is_an_embedding_error() {
        struct Short;

        #[async_trait]
        impl EmbeddingClient for Short {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![0.0])
            }

            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![0.0]])
            }

            fn dimension(&self) -> usize {
                1
            }

            fn model(&self) -> &str {
                "short"
            }
        }

        let cache = EmbeddingCache::new("embedding", None);
        let embedder = CachingEmbedder::new(Short, cache.clone());

        let err = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, HcqaError::Embedding(msg) if msg.contains("received 1")));
        assert!(!cache.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_exhaustion_surfaces_model_error() {
        let flaky = Arc::new(Flaky::new(10));
        let llm = RetryingLlm::new(Arc::clone(&flaky), policy(2));

        let err = llm.generate("prompt").await.unwrap_err();

        assert!(matches!(err, HcqaError::Model(_)));
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn test_model_cache_keyed_on_prompt() {
        let flaky = Arc::new(Flaky::new(0));
        let llm = llm_with_policies(
            Arc::clone(&flaky) as Arc<dyn LlmClient>,
            policy(3),
            ResponseCache::new("response", None),
        );

        assert_eq!(llm.generate("p1").await.unwrap(), "answer to p1");
        assert_eq!(llm.generate("p1").await.unwrap(), "answer to p1");
        assert_eq!(llm.generate("p2").await.unwrap(), "answer to p2");
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        struct Unauthorized(AtomicUsize);

        #[async_trait]
        impl LlmClient for Unauthorized {
            async fn generate(&self, _prompt: &str) -> Result<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(HcqaError::Provider("401 Unauthorized".to_string()))
            }

            fn model(&self) -> &str {
                "denied"
            }
        }

        let inner = Arc::new(Unauthorized(AtomicUsize::new(0)));
        let llm = RetryingLlm::new(Arc::clone(&inner), policy(5));

        assert!(matches!(
            llm.generate("x").await,
            Err(HcqaError::Model(msg)) if msg.contains("401")
        ));
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    }
}
