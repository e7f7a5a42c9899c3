//! Request metrics middleware
//!
//! Counts requests, status classes and latency per route for `/metrics`.
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Per-route request counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    /// Counts keyed by status code
    pub status_counts: BTreeMap<u16, u64>,
    pub total_latency_us: u64,
    pub max_latency_us: u64,
}

impl EndpointMetrics {
    pub fn record(&mut self, status: u16, latency_us: u64) {
        self.requests += 1;
        *self.status_counts.entry(status).or_default() += 1;
        self.total_latency_us += latency_us;
        self.max_latency_us = self.max_latency_us.max(latency_us);
    }

    pub fn mean_latency_us(&self) -> u64 {
        if self.requests == 0 {
            0
        } else {
            self.total_latency_us / self.requests
        }
    }
}

/// Metrics tracking middleware
///
/// Records under the matched route template, so `/api/v1/documents/7`
/// and `/api/v1/documents/8` share one entry.
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let endpoint = endpoint_label(&request);
    let method = request.method().clone();

    let response = next.run(request).await;

    let latency_us = start.elapsed().as_micros() as u64;
    state.record_request(
        format!("{method} {endpoint}"),
        response.status().as_u16(),
        latency_us,
    );

    response
}

fn endpoint_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}
