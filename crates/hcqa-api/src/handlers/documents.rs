//! Document management handlers
//!
//! Uploads go through the same ingestion channel as the JSON Lines source.
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hcqa_core::{DocumentId, DocumentRecord};
use hcqa_rag::parse_json_lines;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

/// Content type of a raw JSON Lines upload
pub const NDJSON: &str = "application/x-ndjson";

/// A committed document
#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentInfo {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = "Aspirin treats headaches.")]
    pub text: String,

    /// Embedding length
    #[schema(example = 1536)]
    pub dimension: usize,

    /// RFC 3339 timestamp of the embedding
    pub ingested_at: String,
}

/// Bulk upload request
#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadDocumentsRequest {
    /// One entry per document, `{"doc": "..."}`; malformed entries are
    /// skipped and reported by position
    #[schema(value_type = Vec<Object>, example = json!([{"doc": "Aspirin treats headaches."}]))]
    pub documents: Vec<serde_json::Value>,
}

/// Upload options
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadParams {
    /// Respond only after the documents are committed
    #[serde(default)]
    #[param(default = false)]
    pub wait: bool,
}

/// Bulk upload response
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadDocumentsResponse {
    /// Ids assigned to accepted documents, in input order
    pub accepted: Vec<u64>,

    /// 1-based positions (JSON) or line numbers (JSON Lines) that were skipped
    pub rejected_lines: Vec<usize>,

    /// Whether the documents are already searchable
    pub committed: bool,
}

/// Upload documents for ingestion
#[utoipa::path(
    post,
    path = "/api/v1/documents",
    tag = "documents",
    params(UploadParams),
    request_body(
        content = UploadDocumentsRequest,
        description = "JSON body, or JSON Lines with Content-Type application/x-ndjson"
    ),
    responses(
        (status = 202, description = "Documents queued for ingestion", body = UploadDocumentsResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 503, description = "Ingestion is not running", body = crate::error::ApiError)
    )
)]
pub async fn upload_documents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let (documents, rejected_lines) = if is_ndjson(&headers) {
        let text = std::str::from_utf8(&body)
            .map_err(|e| AppError::BadRequest(format!("Body is not UTF-8: {e}")))?;
        let parsed = parse_json_lines(text);
        (parsed.documents, parsed.rejected_lines)
    } else {
        let req: UploadDocumentsRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid upload body: {e}")))?;
        split_entries(req.documents)
    };

    if documents.is_empty() && rejected_lines.is_empty() {
        return Err(AppError::BadRequest("No documents in upload".to_string()));
    }

    let ids = state.service.ingest.submit_many(documents).await?;
    if params.wait {
        state.service.ingest.flush().await?;
    }

    tracing::info!(
        accepted = ids.len(),
        rejected = rejected_lines.len(),
        "Documents queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadDocumentsResponse {
            accepted: ids.into_iter().map(DocumentId::get).collect(),
            rejected_lines,
            committed: params.wait,
        }),
    ))
}

/// Get a committed document by id
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}",
    tag = "documents",
    params(
        ("id" = u64, Path, description = "Document id")
    ),
    responses(
        (status = 200, description = "Document details", body = DocumentInfo),
        (status = 404, description = "Document not found", body = crate::error::ApiError)
    )
)]
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let doc = state
        .service
        .store
        .get(DocumentId::new(id))
        .ok_or_else(|| AppError::NotFound(format!("Document {id}")))?;

    Ok(Json(DocumentInfo {
        id: doc.id.get(),
        text: doc.text.clone(),
        dimension: doc.dimension(),
        ingested_at: doc.ingested_at.to_rfc3339(),
    }))
}

/// Delete document response
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteDocumentResponse {
    pub id: u64,
    pub message: String,
}

/// Delete a document
#[utoipa::path(
    delete,
    path = "/api/v1/documents/{id}",
    tag = "documents",
    params(
        ("id" = u64, Path, description = "Document id")
    ),
    responses(
        (status = 200, description = "Document deleted", body = DeleteDocumentResponse),
        (status = 404, description = "Document not found", body = crate::error::ApiError)
    )
)]
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    state.service.ingest.remove(DocumentId::new(id)).await?;
    tracing::info!(id, "Document deleted");

    Ok(Json(DeleteDocumentResponse {
        id,
        message: format!("Document {id} deleted"),
    }))
}

fn is_ndjson(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with(NDJSON))
        .unwrap_or(false)
}

/// Keep entries that are valid records, reporting the rest by 1-based position
fn split_entries(entries: Vec<serde_json::Value>) -> (Vec<String>, Vec<usize>) {
    let mut documents = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();

    for (i, entry) in entries.into_iter().enumerate() {
        match DocumentRecord::from_value(entry) {
            Ok(record) => documents.push(record.doc),
            Err(e) => {
                tracing::warn!(position = i + 1, error = %e, "Skipping malformed upload entry");
                rejected.push(i + 1);
            }
        }
    }

    (documents, rejected)
}
