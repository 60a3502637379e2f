use crate::backends::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status, a client-safe message and optional details.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidRequest(msg) => AppError::bad_request(msg),
            StorageError::InvalidObjectKey => AppError::bad_request("invalid object key"),
            StorageError::ObjectNotFound { key } => {
                AppError::new(StatusCode::NOT_FOUND, format!("song `{}` not found", key))
            }
            StorageError::AccessDenied(details) => {
                AppError::new(StatusCode::FORBIDDEN, "access denied").with_details(details)
            }
            StorageError::AlreadyExists { key } => {
                AppError::new(StatusCode::CONFLICT, format!("song `{}` already exists", key))
            }
            other => {
                tracing::error!(error = %other, "storage backend failure");
                AppError::internal("storage backend failure").with_details(other.to_string())
            }
        }
    }
}
