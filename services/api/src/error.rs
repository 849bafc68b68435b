//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! from the core error taxonomy to structured HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::config::ConfigError;
use hostline_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while running startup migrations.
    #[error("Migration Error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Represents an error related to the WebSocket connection.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] axum::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The JSON body every failed request carries: a machine-stable reason plus a
/// human-readable message. Clients switch on `reason`, never on `message`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub reason: &'static str,
    pub message: String,
}

/// Maps a core port error to its HTTP status and stable reason string.
pub fn port_error_parts(err: &PortError) -> (StatusCode, &'static str) {
    match err {
        PortError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        PortError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        PortError::InvalidState(_) => (StatusCode::BAD_REQUEST, "invalid_state"),
        PortError::InsufficientBalance(_) => (StatusCode::BAD_REQUEST, "insufficient_balance"),
        PortError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        PortError::Unavailable(_) => (StatusCode::BAD_REQUEST, "unavailable"),
        PortError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        PortError::Unexpected(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason, message) = match &self {
            ApiError::Port(port_err) => {
                let (status, reason) = port_error_parts(port_err);
                (status, reason, port_err.to_string())
            }
            // Everything else is an internal failure; the details stay in the
            // logs, not in the response body.
            other => {
                tracing::error!(error = %other, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal error occurred".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { reason, message })).into_response()
    }
}
