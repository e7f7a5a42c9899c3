//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::handlers::{documents, query};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Query endpoints
        .route("/query", post(query::query_handler))
        // Document endpoints
        .route("/documents", post(documents::upload_documents))
        .route(
            "/documents/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
}
