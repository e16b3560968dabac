//! Purchase-order fulfillment tracking for inward receipts
//!
//! Each source order line moves `Open -> PartiallyReceived -> Fulfilled` as
//! inward lines consume its pending quantity. Pending quantity never goes
//! below zero: a request larger than what is pending is refused whole.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{compute_line, LineItem, LineKey};
use crate::contracts::{PurchaseOrderItem, PurchaseOrderResponse};
use crate::error::FulfillmentError;

/// Receipt state of a purchase-order line (or of a whole order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentState {
    Open,
    PartiallyReceived,
    Fulfilled,
}

impl FulfillmentState {
    pub fn of(ordered: Decimal, pending: Decimal) -> Self {
        if pending <= Decimal::ZERO {
            FulfillmentState::Fulfilled
        } else if pending >= ordered {
            FulfillmentState::Open
        } else {
            FulfillmentState::PartiallyReceived
        }
    }

    /// Order-level state from its line states
    pub fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = FulfillmentState>,
    {
        let mut any = false;
        let mut all_open = true;
        let mut all_fulfilled = true;
        for state in states {
            any = true;
            all_open &= state == FulfillmentState::Open;
            all_fulfilled &= state == FulfillmentState::Fulfilled;
        }
        match (any, all_open, all_fulfilled) {
            (false, _, _) | (true, true, _) => FulfillmentState::Open,
            (true, _, true) => FulfillmentState::Fulfilled,
            _ => FulfillmentState::PartiallyReceived,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentState::Open => "open",
            FulfillmentState::PartiallyReceived => "partially_received",
            FulfillmentState::Fulfilled => "fulfilled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(FulfillmentState::Open),
            "partially_received" => Some(FulfillmentState::PartiallyReceived),
            "fulfilled" => Some(FulfillmentState::Fulfilled),
            _ => None,
        }
    }
}

/// Read-only view of a purchase-order line being received against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOrderLine {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub product_code: Option<String>,
    pub product_name: String,
    pub unit: Option<String>,
    pub ordered_quantity: Decimal,
    pub pending_quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_percentage: Decimal,
}

impl From<&PurchaseOrderItem> for SourceOrderLine {
    fn from(item: &PurchaseOrderItem) -> Self {
        Self {
            line_id: item.line_id,
            product_id: item.product_id,
            product_code: item.product_code.clone(),
            product_name: item.product_name.clone(),
            unit: item.unit.clone(),
            ordered_quantity: item.ordered_quantity,
            pending_quantity: item.pending_quantity.max(Decimal::ZERO),
            unit_price: item.unit_price,
            tax_percentage: item.tax_percentage,
        }
    }
}

impl SourceOrderLine {
    pub fn state(&self) -> FulfillmentState {
        FulfillmentState::of(self.ordered_quantity, self.pending_quantity)
    }

    pub fn received_quantity(&self) -> Decimal {
        self.ordered_quantity - self.pending_quantity
    }

    pub fn line_key(&self) -> LineKey {
        LineKey::for_product(self.product_code.as_deref(), self.product_id)
    }

    pub fn check(&self, requested: Decimal) -> Result<(), FulfillmentError> {
        if requested <= Decimal::ZERO {
            return Err(FulfillmentError::NonPositiveQuantity {
                line_id: self.line_id,
                requested,
            });
        }
        if requested > self.pending_quantity {
            return Err(FulfillmentError::ExceedsPending {
                line_id: self.line_id,
                requested,
                pending: self.pending_quantity,
            });
        }
        Ok(())
    }

    /// Consume `requested` from the pending quantity
    pub fn reserve(&mut self, requested: Decimal) -> Result<FulfillmentState, FulfillmentError> {
        self.check(requested)?;
        self.pending_quantity -= requested;
        Ok(self.state())
    }

    /// Give back quantity consumed earlier, never above the ordered quantity
    pub fn release(&mut self, quantity: Decimal) {
        if quantity > Decimal::ZERO {
            self.pending_quantity = self
                .pending_quantity
                .saturating_add(quantity)
                .min(self.ordered_quantity);
        }
    }

    /// Inward line pre-filled with the current pending quantity
    pub fn to_line_item(&self) -> LineItem {
        compute_line(LineItem {
            product_id: Some(self.product_id),
            product_code: self.product_code.clone(),
            product_name: self.product_name.clone(),
            unit: self.unit.clone(),
            quantity: self.pending_quantity,
            unit_price: self.unit_price,
            discount_amount: Decimal::ZERO,
            tax_percentage: self.tax_percentage,
            tax_amount: Decimal::ZERO,
            total_price: Decimal::ZERO,
            expiry_date: None,
            batch_number: None,
            source_line_id: Some(self.line_id),
            pending_quantity_at_source: Some(self.pending_quantity),
        })
    }
}

/// Pending quantities of the purchase order an inward receipt is built against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentTracker {
    order_id: Uuid,
    order_number: Option<String>,
    lines: Vec<SourceOrderLine>,
}

impl FulfillmentTracker {
    pub fn new(order_id: Uuid, order_number: Option<String>, lines: Vec<SourceOrderLine>) -> Self {
        Self {
            order_id,
            order_number,
            lines,
        }
    }

    pub fn from_order(order: &PurchaseOrderResponse) -> Self {
        Self::new(
            order.id,
            order.document_number.clone(),
            order.items.iter().map(SourceOrderLine::from).collect(),
        )
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn order_number(&self) -> Option<&str> {
        self.order_number.as_deref()
    }

    pub fn lines(&self) -> &[SourceOrderLine] {
        &self.lines
    }

    pub fn line(&self, line_id: Uuid) -> Option<&SourceOrderLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn pending_for(&self, line_id: Uuid) -> Option<Decimal> {
        self.line(line_id).map(|l| l.pending_quantity)
    }

    /// First open line for a product identity
    pub fn line_for_key(&self, key: &LineKey) -> Option<&SourceOrderLine> {
        self.lines
            .iter()
            .find(|l| &l.line_key() == key && l.state() != FulfillmentState::Fulfilled)
    }

    pub fn state(&self) -> FulfillmentState {
        FulfillmentState::aggregate(self.lines.iter().map(SourceOrderLine::state))
    }

    pub fn check(&self, line_id: Uuid, requested: Decimal) -> Result<(), FulfillmentError> {
        self.line(line_id)
            .ok_or(FulfillmentError::UnknownSourceLine { line_id })?
            .check(requested)
    }

    /// Check a whole receipt; several requests on one line are summed first
    pub fn check_all(&self, requests: &[(Uuid, Decimal)]) -> Result<(), FulfillmentError> {
        for (line_id, requested) in aggregate_requests(requests) {
            self.check(line_id, requested)?;
        }
        Ok(())
    }

    /// Reserve a whole receipt, or nothing at all
    pub fn commit(
        &mut self,
        requests: &[(Uuid, Decimal)],
    ) -> Result<Vec<(Uuid, FulfillmentState)>, FulfillmentError> {
        let requests = aggregate_requests(requests);
        for (line_id, requested) in &requests {
            if let Err(e) = self.check(*line_id, *requested) {
                tracing::warn!(order_id = %self.order_id, "receipt rejected: {}", e);
                return Err(e);
            }
        }

        let mut states = Vec::with_capacity(requests.len());
        for (line_id, requested) in requests {
            if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == line_id) {
                states.push((line_id, line.reserve(requested)?));
            }
        }
        tracing::debug!(order_id = %self.order_id, lines = states.len(), "receipt committed");
        Ok(states)
    }

    pub fn release(&mut self, line_id: Uuid, quantity: Decimal) -> Result<(), FulfillmentError> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.line_id == line_id)
            .ok_or(FulfillmentError::UnknownSourceLine { line_id })?;
        line.release(quantity);
        Ok(())
    }

    /// Inward lines for every line still pending, at the pending quantity
    pub fn prefill_lines(&self) -> Vec<LineItem> {
        self.lines
            .iter()
            .filter(|l| l.state() != FulfillmentState::Fulfilled)
            .map(SourceOrderLine::to_line_item)
            .collect()
    }
}

/// Sum requests per source line, keeping first-seen order
pub fn aggregate_requests(requests: &[(Uuid, Decimal)]) -> Vec<(Uuid, Decimal)> {
    let mut totals: Vec<(Uuid, Decimal)> = Vec::new();
    for (line_id, quantity) in requests {
        match totals.iter_mut().find(|(id, _)| id == line_id) {
            Some((_, total)) => *total = total.saturating_add(*quantity),
            None => totals.push((*line_id, *quantity)),
        }
    }
    totals
}
