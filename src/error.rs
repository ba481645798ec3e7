//! Error handling for the application

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body returned for failed requests
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error_type: &'static str,
    pub message: String,
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::Database(_) => "database_error",
            AppError::Cache(_) => "cache_error",
            AppError::Queue(_) => "queue_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Cache(msg) | AppError::Queue(msg) | AppError::Internal(msg) => {
                tracing::error!(error_type = self.error_type(), "{}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        let body = ErrorResponse {
            error_type: self.error_type(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
