use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::error::OrchestratorError;
use crate::services::AdmissionError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {message}")]
    TooManyRequests {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        let message = e.to_string();
        match e {
            OrchestratorError::Admission(AdmissionError::CapacityExceeded { .. }) => {
                ApiError::BadRequest(message)
            }
            OrchestratorError::Admission(AdmissionError::ConcurrencyExceeded { .. }) => {
                ApiError::TooManyRequests {
                    message,
                    retry_after: None,
                }
            }
            OrchestratorError::Admission(AdmissionError::RateLimited { retry_after }) => {
                ApiError::TooManyRequests {
                    message,
                    retry_after: Some(retry_after),
                }
            }
            OrchestratorError::UnsupportedEngine(_) => ApiError::BadRequest(message),
            OrchestratorError::ConflictExists(_) | OrchestratorError::DeletionInProgress(_) => {
                ApiError::Conflict(message)
            }
            OrchestratorError::NotFound(_) => ApiError::NotFound(message),
            OrchestratorError::PipelineStepFailed { .. }
            | OrchestratorError::ProvisioningAborted(_)
            | OrchestratorError::DeletionFailed { .. } => ApiError::InternalError(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_header = None;
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            ApiError::Conflict(msg) => {
                tracing::warn!("Conflict: {}", msg);
                (StatusCode::CONFLICT, "Conflict", msg)
            }
            ApiError::TooManyRequests {
                message,
                retry_after,
            } => {
                tracing::warn!("Too many requests: {}", message);
                retry_header = retry_after.map(retry_after_secs);
                (StatusCode::TOO_MANY_REQUESTS, "TooManyRequests", message)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_header {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Whole seconds, rounded up, never zero
fn retry_after_secs(d: Duration) -> u64 {
    (d.as_secs() + u64::from(d.subsec_nanos() > 0)).max(1)
}
