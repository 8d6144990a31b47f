//! Error handling for the BirdNET bridge

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither known database layout is present (fatal at startup)
    #[error("Schema detection failed: {0}")]
    SchemaDetection(String),

    /// A single row could not be mapped to the logical detection shape
    #[error("Schema mapping failed for row {id}: {reason}")]
    SchemaMapping { id: i64, reason: String },

    /// Lock-timeout or I/O error against the source database (retryable)
    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// Outbound publish failure (retryable, halts the current batch)
    #[error("Publish error: {0}")]
    Publish(String),

    /// Validation error (REST query parameters)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error (pool setup, non-query paths)
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    /// True for errors the bridge loop recovers from with backoff or retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DatabaseUnavailable(_) | Error::Publish(_) | Error::Io(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::DatabaseUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_UNAVAILABLE",
                msg.clone(),
            ),
            Error::SchemaDetection(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SCHEMA_ERROR",
                msg.clone(),
            ),
            Error::SchemaMapping { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SCHEMA_ERROR",
                self.to_string(),
            ),
            Error::Publish(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PUBLISH_ERROR",
                msg.clone(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
