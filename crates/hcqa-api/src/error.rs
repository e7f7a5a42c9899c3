//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hcqa_core::HcqaError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    /// An upstream embedding or model provider failed
    Upstream(String),
    Timeout(String),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::NotFound(msg) => ApiError::not_found(&msg),
            AppError::BadRequest(msg) => ApiError::bad_request(msg),
            AppError::Upstream(msg) => {
                ApiError::new("UPSTREAM_ERROR", "Upstream provider failed").with_details(msg)
            }
            AppError::Timeout(msg) => {
                ApiError::new("TIMEOUT", "Request timed out").with_details(msg)
            }
            AppError::Unavailable(msg) => ApiError::new("UNAVAILABLE", msg),
            AppError::Internal(msg) => ApiError::internal_error().with_details(msg),
        };

        if status.is_server_error() {
            tracing::warn!(status = %status, code = %error.code, details = ?error.details, "Request failed");
        }

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<HcqaError> for AppError {
    fn from(err: HcqaError) -> Self {
        match err {
            HcqaError::NotFound(msg) => AppError::NotFound(msg),
            HcqaError::InvalidArgument(msg) => AppError::BadRequest(msg),
            HcqaError::Transport(msg) => AppError::BadRequest(msg),
            HcqaError::Ingestion(msg) => AppError::BadRequest(msg),
            err @ (HcqaError::Embedding(_)
            | HcqaError::Model(_)
            | HcqaError::Transient(_)
            | HcqaError::Provider(_)) => AppError::Upstream(err.to_string()),
            err @ HcqaError::Timeout(_) => AppError::Timeout(err.to_string()),
            HcqaError::Unavailable(msg) => AppError::Unavailable(msg),
            err @ (HcqaError::Config(_) | HcqaError::Other(_)) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
