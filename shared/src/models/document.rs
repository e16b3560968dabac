//! Documents, line merging and summary aggregation

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{compute_line_with, CatalogProduct, LineEdit, LineItem, NegativeTotalPolicy};
use crate::error::{EngineError, FieldError, ValidationErrors};
use crate::types::{max_quantity, round_currency, DocumentKind};

/// Header fields shared by all document kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct DocumentHeader {
    /// Customer for outbound documents, vendor for inbound ones
    #[serde(default)]
    pub counterparty_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub counterparty_name: Option<String>,
    #[serde(default)]
    pub document_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(max = 40, message = "must be at most 40 characters"))]
    pub status: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub remarks: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub reference_number: Option<String>,
    /// Purchase order an inward receipt is received against
    #[serde(default)]
    pub source_order_id: Option<Uuid>,
}

impl DocumentHeader {
    pub fn has_counterparty(&self) -> bool {
        self.counterparty_id.is_some()
            || self
                .counterparty_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty())
    }
}

/// Document totals; always derived from the current lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub line_count: usize,
    pub total_quantity: Decimal,
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub grand_total: Decimal,
}

/// Roll all lines into document totals
///
/// `subtotal` is the unrounded sum of `quantity * unit_price` rounded once;
/// `grand_total = subtotal - total_discount + total_tax`. An empty list
/// yields an all-zero summary. Sums saturate rather than overflow.
pub fn recompute_summary(lines: &[LineItem]) -> DocumentSummary {
    let sum = |f: fn(&LineItem) -> Decimal| {
        lines
            .iter()
            .map(f)
            .fold(Decimal::ZERO, |acc, v| acc.saturating_add(v))
    };
    let total_quantity = sum(|l| l.quantity);
    let subtotal = round_currency(sum(LineItem::gross_amount));
    let total_discount = round_currency(sum(|l| l.discount_amount));
    let total_tax = round_currency(sum(|l| l.tax_amount));

    DocumentSummary {
        line_count: lines.len(),
        total_quantity,
        subtotal,
        total_discount,
        total_tax,
        grand_total: subtotal
            .saturating_sub(total_discount)
            .saturating_add(total_tax),
    }
}

/// Result of adding a resolved product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub index: usize,
    /// False when a new line was appended
    pub merged: bool,
}

/// Increment the line with the product's identity by one, or append a new
/// line with quantity 1
///
/// Fails, leaving `lines` untouched, when the merged quantity or the line's
/// amounts would no longer fit in storage.
pub fn add_or_merge(
    lines: &mut Vec<LineItem>,
    product: &CatalogProduct,
    policy: NegativeTotalPolicy,
) -> Result<MergeOutcome, FieldError> {
    let key = product.line_key();

    if let Some(index) = lines.iter().position(|l| l.key().as_ref() == Some(&key)) {
        let mut line = lines[index].clone();
        line.quantity = line
            .quantity
            .checked_add(Decimal::ONE)
            .filter(|q| *q <= max_quantity())
            .ok_or_else(|| {
                FieldError::line(index, "quantity", format!("cannot exceed {}", max_quantity()))
            })?;
        line.check_amounts(index)?;
        lines[index] = compute_line_with(line, policy);
        tracing::debug!(?key, index, quantity = %lines[index].quantity, "merged into existing line");
        Ok(MergeOutcome {
            index,
            merged: true,
        })
    } else {
        let line = LineItem::from_product(product);
        line.check_amounts(lines.len())?;
        lines.push(compute_line_with(line, policy));
        tracing::debug!(?key, index = lines.len() - 1, "appended line");
        Ok(MergeOutcome {
            index: lines.len() - 1,
            merged: false,
        })
    }
}

/// A document's header and lines with a summary kept in step with them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    kind: DocumentKind,
    header: DocumentHeader,
    lines: Vec<LineItem>,
    summary: DocumentSummary,
}

impl Document {
    pub fn new(kind: DocumentKind) -> Self {
        Self {
            kind,
            header: DocumentHeader::default(),
            lines: Vec::new(),
            summary: DocumentSummary::default(),
        }
    }

    /// Rebuild a document from stored lines, re-deriving every line
    pub fn from_lines(
        kind: DocumentKind,
        header: DocumentHeader,
        lines: Vec<LineItem>,
        policy: NegativeTotalPolicy,
    ) -> Self {
        let lines = lines
            .into_iter()
            .map(|l| compute_line_with(l, policy))
            .collect::<Vec<_>>();
        let summary = recompute_summary(&lines);
        Self {
            kind,
            header,
            lines,
            summary,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    pub fn set_header(&mut self, header: DocumentHeader) {
        self.header = header;
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&LineItem> {
        self.lines.get(index)
    }

    pub fn summary(&self) -> &DocumentSummary {
        &self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn position_of(&self, key: &super::LineKey) -> Option<usize> {
        self.lines.iter().position(|l| l.key().as_ref() == Some(key))
    }

    /// Scan/select path: merge or append
    pub fn add_product(
        &mut self,
        product: &CatalogProduct,
        policy: NegativeTotalPolicy,
    ) -> Result<MergeOutcome, EngineError> {
        let outcome = add_or_merge(&mut self.lines, product, policy)
            .map_err(|e| EngineError::Validation(ValidationErrors::single(e)))?;
        self.refresh();
        Ok(outcome)
    }

    /// Append a prepared line without merging (pre-populated order lines)
    pub fn push_line(&mut self, line: LineItem, policy: NegativeTotalPolicy) -> usize {
        self.lines.push(compute_line_with(line, policy));
        self.refresh();
        self.lines.len() - 1
    }

    /// Manual edit path: set the field absolutely, never merge
    pub fn edit_line(
        &mut self,
        index: usize,
        edit: LineEdit,
        policy: NegativeTotalPolicy,
    ) -> Result<&LineItem, EngineError> {
        let mut line = self
            .lines
            .get(index)
            .cloned()
            .ok_or(EngineError::LineNotFound(index))?;
        edit.apply(index, &mut line)
            .and_then(|()| line.check_amounts(index))
            .map_err(|e| EngineError::Validation(ValidationErrors::single(e)))?;

        self.lines[index] = compute_line_with(line, policy);
        self.refresh();
        Ok(&self.lines[index])
    }

    /// Change bookkeeping fields of a line and re-derive it
    pub fn update_line<F>(
        &mut self,
        index: usize,
        policy: NegativeTotalPolicy,
        f: F,
    ) -> Result<&LineItem, EngineError>
    where
        F: FnOnce(&mut LineItem),
    {
        let mut line = self
            .lines
            .get(index)
            .cloned()
            .ok_or(EngineError::LineNotFound(index))?;
        f(&mut line);
        self.lines[index] = compute_line_with(line, policy);
        self.refresh();
        Ok(&self.lines[index])
    }

    pub fn remove_line(&mut self, index: usize) -> Result<LineItem, EngineError> {
        if index >= self.lines.len() {
            return Err(EngineError::LineNotFound(index));
        }
        let removed = self.lines.remove(index);
        self.refresh();
        Ok(removed)
    }

    pub fn retain_lines<F>(&mut self, f: F)
    where
        F: FnMut(&LineItem) -> bool,
    {
        self.lines.retain(f);
        self.refresh();
    }

    pub fn clear(&mut self) {
        self.header = DocumentHeader::default();
        self.lines.clear();
        self.refresh();
    }

    fn refresh(&mut self) {
        self.summary = recompute_summary(&self.lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn product(code: Option<&str>, price: &str, tax: &str) -> CatalogProduct {
        CatalogProduct {
            id: Uuid::new_v4(),
            code: code.map(str::to_string),
            name: format!("Product {}", code.unwrap_or("-")),
            unit: None,
            unit_price: dec(price),
            tax_percentage: dec(tax),
            category: None,
        }
    }

    #[test]
    fn test_scan_same_code_twice_merges() {
        let p100 = product(Some("P100"), "100", "18");
        let mut doc = Document::new(DocumentKind::Billing);

        let first = doc.add_product(&p100, NegativeTotalPolicy::Allow).unwrap();
        let second = doc.add_product(&p100, NegativeTotalPolicy::Allow).unwrap();

        assert!(!first.merged);
        assert!(second.merged);
        assert_eq!(doc.lines().len(), 1);
        let line = &doc.lines()[0];
        assert_eq!(line.quantity, dec("2"));
        assert_eq!(line.tax_amount, dec("36.00"));
        assert_eq!(line.total_price, dec("236.00"));
    }

    #[test]
    fn test_merge_by_code_across_product_snapshots() {
        let original = product(Some("P100"), "100", "18");
        let mut refreshed = original.clone();
        refreshed.id = Uuid::new_v4();
        refreshed.unit_price = dec("120");

        let mut lines = Vec::new();
        add_or_merge(&mut lines, &original, NegativeTotalPolicy::Allow).unwrap();
        add_or_merge(&mut lines, &refreshed, NegativeTotalPolicy::Allow).unwrap();

        assert_eq!(lines.len(), 1);
        // Snapshot taken at add time is kept
        assert_eq!(lines[0].unit_price, dec("100"));
    }

    #[test]
    fn test_merge_falls_back_to_product_id() {
        let no_code = product(None, "10", "0");
        let mut lines = Vec::new();
        add_or_merge(&mut lines, &no_code, NegativeTotalPolicy::Allow).unwrap();
        add_or_merge(&mut lines, &no_code, NegativeTotalPolicy::Allow).unwrap();
        add_or_merge(&mut lines, &product(None, "10", "0"), NegativeTotalPolicy::Allow).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].quantity, dec("2"));
    }

    #[test]
    fn test_merge_accumulates_on_top_of_manual_quantity() {
        let p = product(Some("A1"), "5", "0");
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&p, NegativeTotalPolicy::Allow).unwrap();
        doc.edit_line(0, LineEdit::Quantity(dec("10")), NegativeTotalPolicy::Allow)
            .unwrap();
        doc.add_product(&p, NegativeTotalPolicy::Allow).unwrap();
        assert_eq!(doc.lines()[0].quantity, dec("11"));
        assert_eq!(doc.summary().subtotal, dec("55.00"));
    }

    #[test]
    fn test_summary_after_edit_and_remove() {
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&product(Some("A"), "50", "10"), NegativeTotalPolicy::Allow).unwrap();
        doc.add_product(&product(Some("B"), "100", "18"), NegativeTotalPolicy::Allow).unwrap();
        doc.edit_line(0, LineEdit::Quantity(dec("3")), NegativeTotalPolicy::Allow)
            .unwrap();
        doc.edit_line(0, LineEdit::DiscountAmount(dec("20")), NegativeTotalPolicy::Allow)
            .unwrap();

        let s = doc.summary();
        assert_eq!(s.line_count, 2);
        assert_eq!(s.total_quantity, dec("4"));
        assert_eq!(s.subtotal, dec("250.00"));
        assert_eq!(s.total_discount, dec("20.00"));
        assert_eq!(s.total_tax, dec("33.00"));
        assert_eq!(s.grand_total, dec("263.00"));

        doc.remove_line(1).unwrap();
        assert_eq!(doc.summary().grand_total, dec("145.00"));
    }

    #[test]
    fn test_remove_only_line_zeroes_summary() {
        let mut doc = Document::new(DocumentKind::Return);
        doc.add_product(&product(Some("A"), "50", "10"), NegativeTotalPolicy::Allow).unwrap();
        doc.remove_line(0).unwrap();
        assert_eq!(doc.summary(), &DocumentSummary::default());
        assert_eq!(recompute_summary(&[]), DocumentSummary::default());
    }

    #[test]
    fn test_missing_line_index() {
        let mut doc = Document::new(DocumentKind::Billing);
        assert_eq!(doc.remove_line(0), Err(EngineError::LineNotFound(0)));
        assert!(matches!(
            doc.edit_line(2, LineEdit::Quantity(Decimal::ONE), NegativeTotalPolicy::Allow),
            Err(EngineError::LineNotFound(2))
        ));
    }

    #[test]
    fn test_rejected_edit_leaves_line_unchanged() {
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&product(Some("A"), "50", "10"), NegativeTotalPolicy::Allow).unwrap();
        let before = doc.clone();
        let err = doc
            .edit_line(0, LineEdit::UnitPrice(dec("-5")), NegativeTotalPolicy::Allow)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_subtotal_rounds_once_over_the_sum() {
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&product(Some("A"), "0.01", "0"), NegativeTotalPolicy::Allow).unwrap();
        doc.add_product(&product(Some("B"), "0.01", "0"), NegativeTotalPolicy::Allow).unwrap();
        doc.edit_line(0, LineEdit::Quantity(dec("0.5")), NegativeTotalPolicy::Allow)
            .unwrap();
        doc.edit_line(1, LineEdit::Quantity(dec("0.5")), NegativeTotalPolicy::Allow)
            .unwrap();
        // 0.005 + 0.005, not round(0.005) + round(0.005)
        assert_eq!(doc.summary().subtotal, dec("0.01"));
    }

    #[test]
    fn test_oversized_edit_is_refused_without_panicking() {
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&product(Some("A"), "999999999999.99", "0"), NegativeTotalPolicy::Allow)
            .unwrap();
        let before = doc.clone();

        let err = doc
            .edit_line(0, LineEdit::Quantity(dec("100000000000000000")), NegativeTotalPolicy::Allow)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_edit_refused_when_total_exceeds_storage() {
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&product(Some("A"), "999999999999.99", "0"), NegativeTotalPolicy::Allow)
            .unwrap();
        let err = doc
            .edit_line(0, LineEdit::Quantity(dec("2")), NegativeTotalPolicy::Allow)
            .unwrap_err();
        let EngineError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("total_price"));
        assert_eq!(doc.lines()[0].quantity, dec("1"));
    }

    #[test]
    fn test_merge_refused_at_quantity_limit() {
        let p = product(Some("A"), "0", "0");
        let mut doc = Document::new(DocumentKind::Billing);
        doc.add_product(&p, NegativeTotalPolicy::Allow).unwrap();
        doc.edit_line(0, LineEdit::Quantity(max_quantity()), NegativeTotalPolicy::Allow)
            .unwrap();
        assert!(doc.add_product(&p, NegativeTotalPolicy::Allow).is_err());
        assert_eq!(doc.lines()[0].quantity, max_quantity());
    }

    #[test]
    fn test_from_lines_heals_stale_fields() {
        let mut line = LineItem::from_product(&product(Some("A"), "50", "10"));
        line.quantity = dec("3");
        line.tax_amount = dec("999");
        let doc = Document::from_lines(
            DocumentKind::Billing,
            DocumentHeader::default(),
            vec![line],
            NegativeTotalPolicy::Allow,
        );
        assert_eq!(doc.lines()[0].tax_amount, dec("15.00"));
        assert_eq!(doc.summary().grand_total, dec("165.00"));
    }

    #[test]
    fn test_header_counterparty() {
        let mut header = DocumentHeader::default();
        assert!(!header.has_counterparty());
        header.counterparty_name = Some("   ".to_string());
        assert!(!header.has_counterparty());
        header.counterparty_name = Some("Acme Traders".to_string());
        assert!(header.has_counterparty());
    }

    #[test]
    fn test_header_length_limits() {
        let header = DocumentHeader {
            remarks: Some("x".repeat(1001)),
            ..Default::default()
        };
        assert!(header.validate().is_err());
    }
}
