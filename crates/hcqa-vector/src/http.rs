//! Failure classification for provider HTTP calls
//!
//! Rate limits, request timeouts, server errors and connection failures
//! become [`HcqaError::Transient`] so retry policies pick them up; other
//! client errors become [`HcqaError::Provider`].

use hcqa_core::HcqaError;
use reqwest::StatusCode;

/// Map a non-success status and its body to an error
pub fn status_error(provider: &str, status: StatusCode, body: &str) -> HcqaError {
    let message = format!("{provider} returned {status}: {}", truncate(body, 512));

    if is_transient_status(status) {
        HcqaError::Transient(message)
    } else {
        HcqaError::Provider(message)
    }
}

/// Map a transport-level failure to an error
pub fn request_error(provider: &str, err: &reqwest::Error) -> HcqaError {
    let message = format!("{provider} request failed: {err}");

    if err.is_timeout() || err.is_connect() || err.is_request() {
        HcqaError::Transient(message)
    } else {
        HcqaError::Provider(message)
    }
}

/// 408, 429 and every 5xx are worth retrying
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        body.to_string()
    } else {
        let mut s: String = body.chars().take(max_chars).collect();
        s.push('…');
        s
    }
}
