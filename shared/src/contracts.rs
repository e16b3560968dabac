//! Request/response contracts between the engine and the persistence boundary

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConflictError, EngineError, FieldError, ValidationErrors};
use crate::models::{DocumentHeader, DocumentSummary, LineItem};
use crate::types::DocumentKind;

/// One line of a purchase order, as fetched to receive against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    #[serde(alias = "id")]
    pub line_id: Uuid,
    pub product_id: Uuid,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(alias = "quantity")]
    pub ordered_quantity: Decimal,
    pub pending_quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
}

/// `GET purchase order by id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderResponse {
    pub id: Uuid,
    #[serde(default)]
    pub document_number: Option<String>,
    #[serde(default)]
    pub header: DocumentHeader,
    pub items: Vec<PurchaseOrderItem>,
}

/// One line of a submitted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitItem {
    pub product_id: Uuid,
    #[serde(default)]
    pub product_code: Option<String>,
    pub product_name: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub tax_amount: Decimal,
    #[serde(default)]
    pub total_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line_id: Option<Uuid>,
}

impl SubmitItem {
    /// `None` for a line without a resolved product
    pub fn from_line(line: &LineItem) -> Option<Self> {
        Some(Self {
            product_id: line.product_id?,
            product_code: line.product_code.clone(),
            product_name: line.product_name.clone(),
            unit: line.unit.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            discount_amount: line.discount_amount,
            tax_percentage: line.tax_percentage,
            tax_amount: line.tax_amount,
            total_price: line.total_price,
            batch_number: line.batch_number.clone(),
            expiry_date: line.expiry_date,
            source_line_id: line.source_line_id,
        })
    }

    /// Line as sent; derived fields still need recomputing
    pub fn to_line_item(&self) -> LineItem {
        LineItem {
            product_id: Some(self.product_id),
            product_code: self.product_code.clone(),
            product_name: self.product_name.clone(),
            unit: self.unit.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount_amount: self.discount_amount,
            tax_percentage: self.tax_percentage,
            tax_amount: self.tax_amount,
            total_price: self.total_price,
            expiry_date: self.expiry_date,
            batch_number: self.batch_number.clone(),
            source_line_id: self.source_line_id,
            pending_quantity_at_source: None,
        }
    }
}

/// `POST document` / `PUT document`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitDocumentRequest {
    pub header: DocumentHeader,
    pub items: Vec<SubmitItem>,
}

/// A validated request plus where to send it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedSubmission {
    pub kind: DocumentKind,
    /// Set when an existing document is being updated
    pub document_id: Option<Uuid>,
    pub request: SubmitDocumentRequest,
}

impl PreparedSubmission {
    pub fn method(&self) -> &'static str {
        if self.document_id.is_some() {
            "PUT"
        } else {
            "POST"
        }
    }

    /// Path below the API prefix
    pub fn path(&self) -> String {
        match self.document_id {
            Some(id) => format!("/documents/{}/{}", self.kind.path_segment(), id),
            None => format!("/documents/{}", self.kind.path_segment()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
}

/// Stored line as returned by the document fetch
///
/// Stored `tax_amount` / `total_price` are read but never trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedItem {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub tax_amount: Option<Decimal>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub source_line_id: Option<Uuid>,
}

impl PersistedItem {
    /// Builder line with derived fields zeroed, ready for `compute_line`
    pub fn into_line_item(self) -> LineItem {
        LineItem {
            product_id: self.product_id,
            product_code: self.product_code,
            product_name: self.product_name,
            unit: self.unit,
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount_amount: self.discount_amount,
            tax_percentage: self.tax_percentage,
            tax_amount: Decimal::ZERO,
            total_price: Decimal::ZERO,
            expiry_date: self.expiry_date,
            batch_number: self.batch_number,
            source_line_id: self.source_line_id,
            pending_quantity_at_source: None,
        }
    }
}

/// `GET document by id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub kind: DocumentKind,
    #[serde(default)]
    pub document_number: Option<String>,
    pub header: DocumentHeader,
    pub items: Vec<PersistedItem>,
    /// Stored totals, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DocumentSummary>,
}

/// Error body returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictError>,
}

impl ErrorResponse {
    /// Map a failed submit back into the engine taxonomy
    pub fn into_engine_error(self, status: u16) -> EngineError {
        let detail = self.error;
        match (status, detail.code.as_str()) {
            (409, _) | (_, "EXCEEDS_PENDING") => EngineError::Conflict(detail.conflict.unwrap_or(
                ConflictError {
                    source_order_id: None,
                    source_line_id: None,
                    message: detail.message,
                },
            )),
            (400 | 422, _) | (_, "VALIDATION_ERROR") => {
                let errors = match detail.details {
                    Some(details) if !details.is_empty() => details,
                    _ => vec![FieldError::header(
                        detail.field.as_deref().unwrap_or("document"),
                        detail.message,
                    )],
                };
                EngineError::Validation(ValidationErrors(errors))
            }
            _ => EngineError::Persistence(format!("{} ({})", detail.message, status)),
        }
    }
}
