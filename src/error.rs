//! Error handling module
//!
//! Centralized error types and HTTP response conversion for the admin API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::processor::ProcessingError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    // Server errors (5xx)
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key", None),
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            AppError::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_balance", Some(err.to_string()))
                }
                DomainError::InvalidAmount(e) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(e.to_string()))
                }
                DomainError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition", Some(err.to_string()))
                }
                DomainError::UnknownVariant { .. } => {
                    (StatusCode::BAD_REQUEST, "unknown_variant", Some(err.to_string()))
                }
            },

            AppError::Store(err) => match err {
                StoreError::NotFound { id, .. } => {
                    (StatusCode::NOT_FOUND, "not_found", Some(id.to_string()))
                }
                StoreError::VersionConflict { .. } => {
                    (StatusCode::CONFLICT, "version_conflict", Some(err.to_string()))
                }
                StoreError::AlreadyExists { id, .. } => {
                    (StatusCode::CONFLICT, "already_exists", Some(id.to_string()))
                }
                StoreError::Database(e) => {
                    tracing::error!("Database error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
                }
                StoreError::Corrupt(e) => {
                    tracing::error!("Corrupt record: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record", None)
                }
            },

            AppError::Processing(err) => match err {
                ProcessingError::CircuitOpen => {
                    (StatusCode::SERVICE_UNAVAILABLE, "circuit_open", None)
                }
                ProcessingError::NotFound { id, .. } => {
                    (StatusCode::NOT_FOUND, "not_found", Some(id.to_string()))
                }
                ProcessingError::DuplicateReference { reference, .. } => {
                    (StatusCode::CONFLICT, "duplicate_reference", Some(reference.clone()))
                }
                ProcessingError::OptimisticLockConflict { .. } => {
                    (StatusCode::CONFLICT, "version_conflict", Some(err.to_string()))
                }
                ProcessingError::MaxRetriesExceeded { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "max_retries_exceeded",
                    Some(err.to_string()),
                ),
                ProcessingError::InvalidState(e) => {
                    (StatusCode::CONFLICT, "invalid_state", Some(e.to_string()))
                }
                ProcessingError::Store(e) => {
                    tracing::error!("Store error during processing: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None)
                }
            },

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.status_and_code();

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
