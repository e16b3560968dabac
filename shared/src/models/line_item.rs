//! Line items and per-line computation

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CatalogProduct, NegativeTotalPolicy};
use crate::error::FieldError;
use crate::types::{
    max_amount, max_quantity, max_tax_percentage, round_currency, round_to_scale, CURRENCY_SCALE,
    QUANTITY_SCALE, RATE_SCALE,
};

/// Merge identity of a line: product code, or product id when there is no code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum LineKey {
    Code(String),
    ProductId(Uuid),
}

impl LineKey {
    pub fn for_product(code: Option<&str>, product_id: Uuid) -> Self {
        match code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => LineKey::Code(code.to_string()),
            None => LineKey::ProductId(product_id),
        }
    }
}

/// One product entry of an in-progress document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Option<Uuid>,
    pub product_code: Option<String>,
    /// Name as it was when the line was added
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
    pub expiry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_number: Option<String>,
    /// Purchase-order line this inward line receives against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line_id: Option<Uuid>,
    /// Pending quantity of the source order line when it was last synced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_quantity_at_source: Option<Decimal>,
}

impl LineItem {
    /// New line for a freshly resolved product: quantity 1, no discount
    pub fn from_product(product: &CatalogProduct) -> Self {
        compute_line(LineItem {
            product_id: Some(product.id),
            product_code: product.code.clone(),
            product_name: product.name.clone(),
            unit: product.unit.clone(),
            quantity: Decimal::ONE,
            unit_price: round_to_scale(product.unit_price, CURRENCY_SCALE),
            discount_amount: Decimal::ZERO,
            tax_percentage: round_to_scale(product.tax_percentage, RATE_SCALE),
            tax_amount: Decimal::ZERO,
            total_price: Decimal::ZERO,
            expiry_date: None,
            batch_number: None,
            source_line_id: None,
            pending_quantity_at_source: None,
        })
    }

    pub fn key(&self) -> Option<LineKey> {
        match (&self.product_code, self.product_id) {
            (Some(code), _) if !code.trim().is_empty() => Some(LineKey::Code(code.trim().to_string())),
            (_, Some(id)) => Some(LineKey::ProductId(id)),
            _ => None,
        }
    }

    /// Quantity times unit price, unrounded; saturates instead of overflowing
    pub fn gross_amount(&self) -> Decimal {
        self.quantity.saturating_mul(self.unit_price)
    }

    /// Tax amount and total for the current inputs, `None` on overflow
    pub fn amounts(&self) -> Option<(Decimal, Decimal)> {
        compute_amounts(self.quantity, self.unit_price, self.tax_percentage, self.discount_amount)
    }

    /// True when the stored derived fields match a fresh computation
    pub fn is_consistent(&self) -> bool {
        self.amounts()
            .is_some_and(|(tax, total)| self.tax_amount == tax && self.total_price == total)
    }

    /// Fails when the derived amounts cannot be computed or stored
    pub fn check_amounts(&self, index: usize) -> Result<(), FieldError> {
        match self.amounts() {
            Some((tax, total)) if tax.abs() <= max_amount() && total.abs() <= max_amount() => Ok(()),
            _ => Err(FieldError::line(index, "total_price", AMOUNT_TOO_LARGE)),
        }
    }
}

/// Message for a line whose tax or total is out of range
pub const AMOUNT_TOO_LARGE: &str = "amount too large";

/// Tax amount and line total for the given inputs, both rounded to 2 dp
///
/// `tax = q * p * t / 100`, `total = q * p + tax - discount`. Negative totals
/// are returned as-is. `None` when an intermediate overflows.
pub fn compute_amounts(
    quantity: Decimal,
    unit_price: Decimal,
    tax_percentage: Decimal,
    discount_amount: Decimal,
) -> Option<(Decimal, Decimal)> {
    let gross = quantity.checked_mul(unit_price)?;
    let tax_amount = round_currency(
        gross
            .checked_mul(tax_percentage)?
            .checked_div(Decimal::ONE_HUNDRED)?,
    );
    let total_price = round_currency(gross.checked_add(tax_amount)?.checked_sub(discount_amount)?);
    Some((tax_amount, total_price))
}

/// Re-derive tax amount and total price of a line
pub fn compute_line(line: LineItem) -> LineItem {
    compute_line_with(line, NegativeTotalPolicy::Allow)
}

/// [`compute_line`] with an explicit negative-total policy
///
/// A line whose amounts overflow gets zero tax and total; validation rejects it.
pub fn compute_line_with(mut line: LineItem, policy: NegativeTotalPolicy) -> LineItem {
    let (tax_amount, total_price) = line.amounts().unwrap_or_else(|| {
        tracing::warn!(
            quantity = %line.quantity,
            unit_price = %line.unit_price,
            "line amounts overflow"
        );
        (round_currency(Decimal::ZERO), round_currency(Decimal::ZERO))
    });
    line.tax_amount = tax_amount;
    line.total_price = match policy {
        NegativeTotalPolicy::ClampToZero if total_price < Decimal::ZERO => round_currency(Decimal::ZERO),
        _ => total_price,
    };
    line
}

/// A manual edit typed into a line; sets the field absolutely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum LineEdit {
    Quantity(Decimal),
    UnitPrice(Decimal),
    DiscountAmount(Decimal),
    TaxPercentage(Decimal),
    BatchNumber(Option<String>),
    ExpiryDate(Option<NaiveDate>),
}

impl LineEdit {
    pub fn field(&self) -> &'static str {
        match self {
            LineEdit::Quantity(_) => "quantity",
            LineEdit::UnitPrice(_) => "unit_price",
            LineEdit::DiscountAmount(_) => "discount_amount",
            LineEdit::TaxPercentage(_) => "tax_percentage",
            LineEdit::BatchNumber(_) => "batch_number",
            LineEdit::ExpiryDate(_) => "expiry_date",
        }
    }

    /// Whether the edit changes an input of the line computation
    pub fn affects_amounts(&self) -> bool {
        !matches!(self, LineEdit::BatchNumber(_) | LineEdit::ExpiryDate(_))
    }

    /// Write the edit into `line` without recomputing
    ///
    /// Numbers are rounded to their stored scale; negative or oversized ones
    /// are refused.
    pub fn apply(self, index: usize, line: &mut LineItem) -> Result<(), FieldError> {
        let field = self.field();
        let storable = |value: Decimal, scale: u32, max: Decimal| {
            if value < Decimal::ZERO {
                return Err(FieldError::line(index, field, "cannot be negative"));
            }
            let value = round_to_scale(value, scale);
            if value > max {
                return Err(FieldError::line(index, field, format!("cannot exceed {}", max)));
            }
            Ok(value)
        };

        match self {
            LineEdit::Quantity(v) => line.quantity = storable(v, QUANTITY_SCALE, max_quantity())?,
            LineEdit::UnitPrice(v) => line.unit_price = storable(v, CURRENCY_SCALE, max_amount())?,
            LineEdit::DiscountAmount(v) => {
                line.discount_amount = storable(v, CURRENCY_SCALE, max_amount())?
            }
            LineEdit::TaxPercentage(v) => {
                line.tax_percentage = storable(v, RATE_SCALE, max_tax_percentage())?
            }
            LineEdit::BatchNumber(v) => {
                line.batch_number = v.map(|b| b.trim().to_string()).filter(|b| !b.is_empty())
            }
            LineEdit::ExpiryDate(v) => line.expiry_date = v,
        }
        Ok(())
    }
}
