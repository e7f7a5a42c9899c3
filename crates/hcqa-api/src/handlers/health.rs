//! Health check handlers
//!
//! Author: hephaex@gmail.com

use crate::middleware::EndpointMetrics;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use hcqa_core::QueryId;
use hcqa_rag::{CacheStatsReport, IngestReport};
use hcqa_vector::IndexStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub build_info: BuildInfo,
}

#[derive(Serialize, ToSchema)]
pub struct BuildInfo {
    pub name: String,
    pub rust_version: String,
}

/// Liveness probe - basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_info: BuildInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            rust_version: "1.75+".to_string(),
        },
    })
}

/// Readiness response
#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessChecks {
    /// Ingestor task is consuming its channel
    pub ingestor: bool,
    /// Committed documents in the index
    pub indexed_documents: usize,
}

/// Readiness probe - ready while ingestion runs
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "Service not ready", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let is_ready = state.is_ready();

    let response = ReadinessResponse {
        ready: is_ready,
        checks: ReadinessChecks {
            ingestor: is_ready,
            indexed_documents: state.service.index.len(),
        },
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// An accepted query still waiting for its answer
#[derive(Serialize)]
pub struct PendingQueryInfo {
    pub query_id: QueryId,
    pub user: String,
    pub waiting_ms: u64,
}

/// JSON metrics response
#[derive(Serialize)]
pub struct MetricsResponse {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub pending_queries: usize,
    /// Oldest first
    pub pending: Vec<PendingQueryInfo>,
    pub index: IndexStats,
    pub ingest: IngestReport,
    pub caches: Vec<CacheStatsReport>,
    pub endpoints: BTreeMap<String, EndpointMetrics>,
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.uptime_secs();
    let total_requests = state.get_request_count();
    let rps = if uptime > 0 {
        total_requests as f64 / uptime as f64
    } else {
        0.0
    };

    let pending: Vec<PendingQueryInfo> = state
        .pending_list()
        .into_iter()
        .map(|q| PendingQueryInfo {
            query_id: q.id,
            user: q.user,
            waiting_ms: q.received_at.elapsed().as_millis() as u64,
        })
        .collect();

    Json(MetricsResponse {
        uptime_seconds: uptime,
        total_requests,
        requests_per_second: rps,
        pending_queries: pending.len(),
        pending,
        index: state.service.index.stats(),
        ingest: state.service.ingest.stats(),
        caches: state.service.caches.all_stats(),
        endpoints: state.endpoint_metrics(),
    })
}
