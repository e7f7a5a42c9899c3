//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::middleware::EndpointMetrics;
use hcqa_core::config::AppConfig;
use hcqa_core::{Query, QueryId};
use hcqa_rag::HcqaService;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// A query that has been accepted and not yet answered
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub id: QueryId,
    pub user: String,
    pub received_at: Instant,
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
    /// Ingestion handle, index, store, caches and query pipeline
    pub service: HcqaService,
    pending: Mutex<HashMap<QueryId, PendingQuery>>,
    endpoints: Mutex<BTreeMap<String, EndpointMetrics>>,
}

impl AppState {
    /// Create new application state around an assembled service
    pub fn new(config: AppConfig, service: HcqaService) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            service,
            pending: Mutex::new(HashMap::new()),
            endpoints: Mutex::new(BTreeMap::new()),
        }
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Record one finished request against its route
    pub fn record_request(&self, endpoint: String, status: u16, latency_us: u64) {
        self.increment_requests();
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint)
            .or_default()
            .record(status, latency_us);
    }

    /// Per-route counters, keyed by `METHOD /route`
    pub fn endpoint_metrics(&self) -> BTreeMap<String, EndpointMetrics> {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Ready while the ingestor task is consuming its channel
    pub fn is_ready(&self) -> bool {
        self.service.ingest.is_running()
    }

    /// Register an accepted query. The entry lives as long as the guard.
    pub fn track_query(self: &Arc<Self>, query: &Query) -> PendingGuard {
        self.pending_map().insert(
            query.id,
            PendingQuery {
                id: query.id,
                user: query.user.clone(),
                received_at: Instant::now(),
            },
        );

        PendingGuard {
            state: Arc::clone(self),
            id: query.id,
        }
    }

    /// Number of queries accepted but not yet answered
    pub fn pending_queries(&self) -> usize {
        self.pending_map().len()
    }

    /// Unanswered queries, oldest first
    pub fn pending_list(&self) -> Vec<PendingQuery> {
        let mut pending: Vec<PendingQuery> = self.pending_map().values().cloned().collect();
        pending.sort_by_key(|q| q.received_at);
        pending
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<QueryId, PendingQuery>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a query from the pending set when the response is written or
/// the request future is dropped
pub struct PendingGuard {
    state: Arc<AppState>,
    id: QueryId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.state.pending_map().remove(&self.id);
    }
}
