//! Submit-time validation for documents
//!
//! Used by the builder before a submit and by the backend when it
//! re-validates a submission. Every problem is collected; validation never
//! stops at the first error so the UI can mark all offending fields.

use rust_decimal::Decimal;
use validator::Validate;

use crate::contracts::SubmitDocumentRequest;
use crate::error::{FieldError, FulfillmentError, ValidationErrors};
use crate::models::{
    compute_line_with, recompute_summary, DocumentHeader, EnginePolicy, FulfillmentTracker,
    LineItem, NegativeTotalPolicy, OverReceiptPolicy,
};
use crate::types::{
    exceeds_scale, max_amount, max_quantity, max_tax_percentage, DocumentKind, CURRENCY_SCALE,
    QUANTITY_SCALE, RATE_SCALE,
};

/// Message for a document without lines
pub const NO_LINES_MESSAGE: &str = "at least one line required";

/// Required header fields plus length limits
pub fn validate_header(kind: DocumentKind, header: &DocumentHeader) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !header.has_counterparty() {
        let who = match kind.price_basis() {
            crate::types::PriceBasis::Selling => "customer",
            crate::types::PriceBasis::Purchase => "vendor",
        };
        errors.push(FieldError::header("counterparty", format!("{} is required", who)));
    }
    if header.document_date.is_none() {
        errors.push(FieldError::header("document_date", "date is required"));
    }
    if header.source_order_id.is_some() && !kind.tracks_fulfillment() {
        errors.push(FieldError::header(
            "source_order_id",
            format!("{} documents cannot reference a purchase order", kind),
        ));
    }

    if let Err(e) = header.validate() {
        let mut fields: Vec<_> = e.field_errors().into_iter().collect();
        fields.sort_by_key(|(name, _)| *name);
        for (field, failures) in fields {
            for failure in failures {
                let message = failure
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("is invalid ({})", failure.code));
                errors.push(FieldError::header(field, message));
            }
        }
    }

    errors
}

/// Message for a document whose totals do not fit in storage
pub const DOCUMENT_TOTAL_TOO_LARGE: &str = "document total too large";

/// Per-line rules: resolved product, positive quantity, non-negative inputs
/// that fit the stored precision, and storable amounts
pub fn validate_lines(lines: &[LineItem], policy: &EnginePolicy) -> Vec<FieldError> {
    if lines.is_empty() {
        return vec![FieldError::header("items", NO_LINES_MESSAGE)];
    }

    let mut errors = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.product_id.is_none() {
            errors.push(FieldError::line(i, "product_id", "product is not resolved"));
        }
        if line.quantity <= Decimal::ZERO {
            errors.push(FieldError::line(i, "quantity", "must be greater than zero"));
        }

        let inputs = [
            ("quantity", line.quantity, QUANTITY_SCALE, max_quantity()),
            ("unit_price", line.unit_price, CURRENCY_SCALE, max_amount()),
            ("discount_amount", line.discount_amount, CURRENCY_SCALE, max_amount()),
            ("tax_percentage", line.tax_percentage, RATE_SCALE, max_tax_percentage()),
        ];
        for (field, value, scale, max) in inputs {
            if value < Decimal::ZERO {
                if field != "quantity" {
                    errors.push(FieldError::line(i, field, "cannot be negative"));
                }
            } else if value > max {
                errors.push(FieldError::line(i, field, format!("cannot exceed {}", max)));
            } else if exceeds_scale(value, scale) {
                errors.push(FieldError::line(
                    i,
                    field,
                    format!("must have at most {} decimal places", scale),
                ));
            }
        }

        if let Err(e) = line.check_amounts(i) {
            errors.push(e);
        } else if policy.negative_totals == NegativeTotalPolicy::Reject
            && line.total_price < Decimal::ZERO
        {
            errors.push(FieldError::line(
                i,
                "discount_amount",
                "discount exceeds price plus tax",
            ));
        }
    }

    let summary = recompute_summary(lines);
    let amounts = [
        summary.subtotal,
        summary.total_discount,
        summary.total_tax,
        summary.grand_total,
    ];
    if summary.total_quantity > max_quantity() || amounts.iter().any(|a| a.abs() > max_amount()) {
        errors.push(FieldError::header("items", DOCUMENT_TOTAL_TOO_LARGE));
    }
    errors
}

/// Inward lines against a purchase order must stay within pending quantity
pub fn validate_fulfillment(
    lines: &[LineItem],
    tracker: &FulfillmentTracker,
    policy: &EnginePolicy,
) -> Vec<FieldError> {
    if policy.over_receipt == OverReceiptPolicy::DeferToServer {
        return Vec::new();
    }

    let mut errors = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(line_id) = line.source_line_id else {
            continue;
        };
        if line.quantity <= Decimal::ZERO {
            // already reported by validate_lines
            continue;
        }
        // Lines sharing a source line are checked against their combined quantity
        let requested = lines
            .iter()
            .filter(|l| l.source_line_id == Some(line_id))
            .fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.quantity));

        match tracker.check(line_id, requested) {
            Ok(()) => {}
            Err(FulfillmentError::ExceedsPending { pending, .. }) => errors.push(FieldError::line(
                i,
                "quantity",
                format!("exceeds pending quantity {}", pending),
            )),
            Err(e) => errors.push(FieldError::line(i, "source_line_id", e.to_string())),
        }
    }
    errors
}

/// Everything a document must satisfy before it is submitted
pub fn validate_document(
    kind: DocumentKind,
    header: &DocumentHeader,
    lines: &[LineItem],
    tracker: Option<&FulfillmentTracker>,
    policy: &EnginePolicy,
) -> Result<(), ValidationErrors> {
    let mut errors = validate_header(kind, header);
    errors.extend(validate_lines(lines, policy));

    let references_order = lines.iter().any(|l| l.source_line_id.is_some());
    if references_order && header.source_order_id.is_none() && kind.tracks_fulfillment() {
        errors.push(FieldError::header(
            "source_order_id",
            "purchase order is required for lines received against it",
        ));
    }
    if let Some(tracker) = tracker {
        if header.source_order_id.is_some_and(|id| id != tracker.order_id()) {
            errors.push(FieldError::header(
                "source_order_id",
                "does not match the loaded purchase order",
            ));
        }
        errors.extend(validate_fulfillment(lines, tracker, policy));
    }

    ValidationErrors(errors).into_result()
}

/// Server-side check of a submitted payload
///
/// Returns the lines with derived fields recomputed; whatever the client sent
/// for tax and totals is discarded. Pending quantities are not checked here:
/// the persistence layer does that atomically.
pub fn validate_submission(
    kind: DocumentKind,
    request: &SubmitDocumentRequest,
    policy: &EnginePolicy,
) -> Result<Vec<LineItem>, ValidationErrors> {
    let lines: Vec<LineItem> = request
        .items
        .iter()
        .map(|item| compute_line_with(item.to_line_item(), policy.negative_totals))
        .collect();

    validate_document(kind, &request.header, &lines, None, policy)?;
    Ok(lines)
}
