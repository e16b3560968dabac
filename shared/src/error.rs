//! Error taxonomy of the document engine
//!
//! Every failure is recoverable and returned as a typed result; nothing in
//! the engine panics across the computation boundary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BuilderState, CatalogProduct};

/// Product lookup failures
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    #[error("No product matches {query}")]
    NotFound { query: String },

    #[error("{query} matches {} products", .candidates.len())]
    Ambiguous {
        query: String,
        candidates: Vec<CatalogProduct>,
    },

    #[error("Malformed product record: {reason}")]
    Malformed { reason: String },
}

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    /// Index of the offending line, if the error belongs to a line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl FieldError {
    pub fn header(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            line: None,
        }
    }

    pub fn line(index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            line: Some(index),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {} {}: {}", line + 1, self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// Validation failures that block a submit
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[error("{} validation error(s)", .0.len())]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(error: FieldError) -> Self {
        Self(vec![error])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Errors attached to one line
    pub fn for_line(&self, index: usize) -> impl Iterator<Item = &FieldError> {
        self.0.iter().filter(move |e| e.line == Some(index))
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when no error was collected
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Purchase-order pending quantity violations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FulfillmentError {
    #[error("Requested {requested} exceeds pending {pending} on order line {line_id}")]
    ExceedsPending {
        line_id: Uuid,
        requested: Decimal,
        pending: Decimal,
    },

    #[error("Requested quantity {requested} on order line {line_id} must be positive")]
    NonPositiveQuantity { line_id: Uuid, requested: Decimal },

    #[error("Order line {line_id} is not part of the source purchase order")]
    UnknownSourceLine { line_id: Uuid },
}

/// The server rejected a submit because a concurrent receipt consumed the
/// pending quantity first
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ConflictError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_order_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line_id: Option<Uuid>,
    pub message: String,
}

/// Engine errors surfaced to the UI layer
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Cannot {operation} while the builder is {state}")]
    InvalidState {
        operation: String,
        state: BuilderState,
    },

    #[error("Line {0} does not exist")]
    LineNotFound(usize),
}

impl EngineError {
    pub fn invalid_state(operation: &str, state: BuilderState) -> Self {
        EngineError::InvalidState {
            operation: operation.to_string(),
            state,
        }
    }

    /// Stable code for UI messages
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Resolution(ResolutionError::NotFound { .. }) => "PRODUCT_NOT_FOUND",
            EngineError::Resolution(ResolutionError::Ambiguous { .. }) => "PRODUCT_AMBIGUOUS",
            EngineError::Resolution(ResolutionError::Malformed { .. }) => "PRODUCT_MALFORMED",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Conflict(_) => "EXCEEDS_PENDING",
            EngineError::Persistence(_) => "PERSISTENCE_ERROR",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::LineNotFound(_) => "LINE_NOT_FOUND",
        }
    }

    /// Whether resending the same payload may succeed without user changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }
}
