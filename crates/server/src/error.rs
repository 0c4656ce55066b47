// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use toolbox_core::{JobError, NoticeError};

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Notice error: {0}")]
    Notice(#[from] NoticeError),

    #[error("Missing user: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(JobError::Busy { op, key }) => {
                tracing::info!(op = %op, key = %key, "Job busy");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details(
                        "a task is already running, please wait",
                        format!("{op}: {key}"),
                    ),
                )
            }
            ApiError::Job(JobError::ForcedExit) | ApiError::Notice(NoticeError::ForcedExit) => {
                (StatusCode::CONFLICT, ErrorResponse::new("cancelled"))
            }
            ApiError::Notice(err) => {
                let status = match err {
                    NoticeError::UserNotOnline { .. } | NoticeError::ClientNotOnline { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    NoticeError::MessageTypeNotAccepted { .. } => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "Notice error");
                    (status, ErrorResponse::new("Internal server error"))
                } else {
                    tracing::info!(error = %err, "Notice not delivered");
                    (status, ErrorResponse::with_details("Notice not delivered", err.to_string()))
                }
            }
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_details("Unauthorized", msg.clone()),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_details("Not found", msg.clone()),
            ),
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                // Details stay in the log.
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
