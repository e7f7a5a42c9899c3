//! Query handlers
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use hcqa_core::{Answer, Query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Query request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// User's question
    #[schema(example = "What treats headaches?")]
    pub query: String,

    /// Caller identity, recorded with the pending query
    #[schema(example = "alice")]
    pub user: String,
}

/// A retrieved document used as context
#[derive(Debug, Serialize, ToSchema)]
pub struct Source {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = "Aspirin treats headaches.")]
    pub text: String,

    /// Distance from the query under the configured metric
    #[schema(example = 0.42)]
    pub distance: f32,
}

/// Structured query response body
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryResponse {
    #[schema(example = "6f1c2d3e-0000-4000-8000-000000000000")]
    pub query_id: String,

    /// Generated answer
    #[schema(example = "Aspirin.")]
    pub answer: String,

    /// Retrieved context, nearest first
    pub sources: Vec<Source>,

    /// Processing time in milliseconds
    #[schema(example = 850)]
    pub processing_time_ms: u64,
}

impl From<Answer> for QueryResponse {
    fn from(answer: Answer) -> Self {
        Self {
            query_id: answer.query_id.to_string(),
            answer: answer.answer,
            sources: answer
                .sources
                .into_iter()
                .map(|source| Source {
                    id: source.id.get(),
                    text: source.text,
                    distance: source.distance,
                })
                .collect(),
            processing_time_ms: answer.processing_time_ms,
        }
    }
}

/// Answer a question; the body is the answer as a JSON string
#[utoipa::path(
    post,
    path = "/",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Answer text", body = String),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 502, description = "Embedding or model provider failed", body = crate::error::ApiError),
        (status = 504, description = "Query timed out", body = crate::error::ApiError)
    )
)]
pub async fn answer_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<String>, AppError> {
    let answer = run_query(&state, payload?.0).await?;
    Ok(Json(answer.answer))
}

/// Answer a question with its sources
#[utoipa::path(
    post,
    path = "/api/v1/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Query successful", body = QueryResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 502, description = "Embedding or model provider failed", body = crate::error::ApiError),
        (status = 504, description = "Query timed out", body = crate::error::ApiError)
    )
)]
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let answer = run_query(&state, payload?.0).await?;
    Ok(Json(answer.into()))
}

async fn run_query(state: &Arc<AppState>, req: QueryRequest) -> Result<Answer, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError::BadRequest("Query cannot be empty".to_string()));
    }

    let query = Query::new(req.query, req.user);
    let _pending = state.track_query(&query);

    Ok(state.service.pipeline.answer_query(query).await?)
}
