//! API errors and their HTTP mapping.

use axum::extract::multipart::MultipartError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use docproc_core::ErrorType;
use docproc_tasks::TaskError;

use crate::auth::Unauthorized;

/// Body of every error response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[schema(value_type = String, example = "validation_error")]
    pub error_type: ErrorType,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),

    #[error("{0}")]
    BadRequest(String),

    #[error("task not found: {0}")]
    UnknownTask(String),

    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Task(e) => match e {
                TaskError::Validation(_) | TaskError::AlreadyTerminal { .. } => StatusCode::BAD_REQUEST,
                TaskError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                TaskError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                TaskError::NotFound(_) => StatusCode::NOT_FOUND,
                TaskError::AccessDenied(_) => StatusCode::FORBIDDEN,
                TaskError::QueueFull(_)
                | TaskError::CircuitOpen { .. }
                | TaskError::Disabled
                | TaskError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                TaskError::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownTask(_) => StatusCode::NOT_FOUND,
            ApiError::Multipart(e) => e.status(),
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            ApiError::Task(e) => e.error_type(),
            ApiError::Unauthorized(_) => ErrorType::AuthError,
            ApiError::BadRequest(_) | ApiError::UnknownTask(_) | ApiError::Multipart(_) => {
                ErrorType::ValidationError
            }
            ApiError::Unavailable(_) => ErrorType::SystemError,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR || matches!(self, ApiError::Task(TaskError::Storage(_))) {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let retry_after = match &self {
            ApiError::Task(TaskError::RateLimited { retry_after_secs, .. }) => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            error_type: self.error_type(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
