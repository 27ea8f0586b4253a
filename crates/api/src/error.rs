//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga execution error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(SagaError::Aborted {
                saga_id,
                failed_request,
                compensation_failures,
            }) => {
                let body = serde_json::json!({
                    "saga_id": saga_id.to_string(),
                    "status": "aborted",
                    "failed_request": failed_request,
                    "compensation_failures": compensation_failures,
                });
                return (StatusCode::CONFLICT, axum::Json(body)).into_response();
            }
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::Interpretation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::AlreadyRunning(_) | SagaError::DuplicateSaga(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "saga error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
