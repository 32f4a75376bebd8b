//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same `{error, message}` body and maps
//! the RAG and avatar errors onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use parley_avatar::AvatarError;
use parley_rag::RagError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "upstream_error").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 409 Conflict - avatar session already running.
    Conflict(String),
    /// 502 Bad Gateway - a hosted service failed.
    BadGateway(String),
    /// 503 Service Unavailable - component disabled or not running.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        ApiError::BadGateway(err.to_string())
    }
}

impl From<AvatarError> for ApiError {
    fn from(err: AvatarError) -> Self {
        match &err {
            AvatarError::AlreadyStarted(_) | AvatarError::InvalidTransition(..) => {
                ApiError::Conflict(err.to_string())
            }
            AvatarError::Unavailable => ApiError::ServiceUnavailable(err.to_string()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}
