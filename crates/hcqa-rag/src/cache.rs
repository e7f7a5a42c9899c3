//! Caching layer for external calls
//!
//! Memoizes embeddings (keyed on the exact input text) and model
//! responses (keyed on the exact prompt) so identical inputs reach the
//! provider once while the entry is cached.
//!
//! Uses the moka crate for thread-safe, async-compatible caching.
//!
//! Author: hephaex@gmail.com

use hcqa_core::{CacheConfig, HcqaError, Result};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Text-keyed cache
// ============================================================================

/// Concurrent cache keyed on exact input text
#[derive(Clone)]
pub struct TextCache<V: Clone + Send + Sync + 'static> {
    cache: Cache<String, V>,
    stats: Arc<CacheStats>,
}

/// Text -> embedding vector
pub type EmbeddingCache = TextCache<Vec<f32>>;

/// Prompt -> model response
pub type ResponseCache = TextCache<String>;

impl<V: Clone + Send + Sync + 'static> TextCache<V> {
    /// Create a cache holding at most `capacity` entries (`None` = unbounded)
    pub fn new(name: impl Into<String>, capacity: Option<u64>) -> Self {
        let builder = Cache::builder();
        let cache = match capacity {
            Some(max) => builder.max_capacity(max).build(),
            None => builder.build(),
        };

        Self {
            cache,
            stats: Arc::new(CacheStats::new(name)),
        }
    }

    /// Get a value from cache
    pub async fn get(&self, key: &str) -> Option<V> {
        let result = self.cache.get(key).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store a value in cache
    pub async fn put(&self, key: &str, value: V) {
        self.cache.insert(key.to_string(), value).await;
        self.stats.record_write();
    }

    /// Presence check that leaves the hit and miss counters alone
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Statistics together with the current entry count
    pub fn report(&self) -> CacheStatsReport {
        self.stats.report(self.cache.entry_count())
    }
}

/// Return the cached value for `key`, or run `op` and cache its success.
///
/// Concurrent callers missing on the same key share one run of `op`: the
/// first one runs it and the rest wait for its result. Failures are not
/// cached, and every waiter receives the error.
pub async fn with_cache<V, F, Fut>(cache: &TextCache<V>, key: &str, op: F) -> Result<V>
where
    V: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
{
    match cache.cache.entry_by_ref(key).or_try_insert_with(op()).await {
        Ok(entry) if entry.is_fresh() => {
            cache.stats.record_miss();
            cache.stats.record_write();
            Ok(entry.into_value())
        }
        Ok(entry) => {
            cache.stats.record_hit();
            Ok(entry.into_value())
        }
        Err(shared) => {
            cache.stats.record_miss();
            Err(HcqaError::from_shared(shared))
        }
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    /// Cache name for identification
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self, entries: u64) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            entries,
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    /// Approximate number of cached entries
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub total_requests: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

// ============================================================================
// Cache Manager
// ============================================================================

/// The caches shared by the ingestion and query paths
#[derive(Clone)]
pub struct CacheManager {
    pub embedding: EmbeddingCache,
    pub response: ResponseCache,
}

impl CacheManager {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            embedding: EmbeddingCache::new("embedding", config.embedding_capacity),
            response: ResponseCache::new("response", config.response_capacity),
        }
    }

    /// Get combined statistics for all caches
    pub fn all_stats(&self) -> Vec<CacheStatsReport> {
        vec![self.embedding.report(), self.response.report()]
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
