//! Error handling for the Stockdesk server
//!
//! Every error leaves as `{ "error": { "code", "message", ... } }`, the same
//! body the engine parses back into its own error taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::{ConflictError, EngineError, ErrorDetail, ErrorResponse, ResolutionError, ValidationErrors};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Pending quantity conflict: {0}")]
    Conflict(ConflictError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(errors) => AppError::Validation(errors),
            EngineError::Conflict(conflict) => AppError::Conflict(conflict),
            EngineError::Resolution(ResolutionError::NotFound { query }) => {
                AppError::NotFound(format!("Product matching {}", query))
            }
            EngineError::Resolution(e) => AppError::BadRequest(e.to_string()),
            EngineError::Persistence(msg) => AppError::Internal(msg),
            e @ (EngineError::InvalidState { .. } | EngineError::LineNotFound(_)) => {
                AppError::BadRequest(e.to_string())
            }
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body; internal details are not exposed
    pub fn detail(&self) -> ErrorDetail {
        let detail = |code: &str, message: String| ErrorDetail {
            code: code.to_string(),
            message,
            field: None,
            details: None,
            conflict: None,
        };

        match self {
            AppError::Validation(errors) => ErrorDetail {
                field: errors.errors().first().map(|e| e.field.clone()),
                details: Some(errors.errors().to_vec()),
                ..detail(
                    "VALIDATION_ERROR",
                    errors
                        .errors()
                        .first()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                )
            },
            AppError::NotFound(resource) => detail("NOT_FOUND", format!("{} not found", resource)),
            AppError::Conflict(conflict) => ErrorDetail {
                conflict: Some(conflict.clone()),
                ..detail("EXCEEDS_PENDING", conflict.message.clone())
            },
            AppError::BadRequest(msg) => detail("BAD_REQUEST", msg.clone()),
            AppError::DatabaseError(_) => {
                detail("DATABASE_ERROR", "A database error occurred".to_string())
            }
            AppError::Internal(msg) => detail("INTERNAL_ERROR", msg.clone()),
            AppError::InternalError(_) => {
                detail("INTERNAL_ERROR", "An internal server error occurred".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log the error for debugging
        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: self.detail() })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
