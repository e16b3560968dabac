//! Common types used across the engine

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept on currency amounts
pub const CURRENCY_SCALE: u32 = 2;

/// Decimal places kept on line quantities
pub const QUANTITY_SCALE: u32 = 3;

/// Decimal places kept on tax percentages
pub const RATE_SCALE: u32 = 2;

/// Largest amount a stored price, discount, tax or total can hold
pub fn max_amount() -> Decimal {
    Decimal::new(99_999_999_999_999, CURRENCY_SCALE)
}

/// Largest quantity a stored line can hold
pub fn max_quantity() -> Decimal {
    Decimal::new(99_999_999_999_999, QUANTITY_SCALE)
}

pub fn max_tax_percentage() -> Decimal {
    Decimal::new(999_999, RATE_SCALE)
}

/// Round half away from zero to `scale` places, as stored
pub fn round_to_scale(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether `value` carries more decimal places than `scale`
pub fn exceeds_scale(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() > scale
}

/// Round a currency amount to two decimal places, halves away from zero
pub fn round_currency(amount: Decimal) -> Decimal {
    let mut rounded = round_to_scale(amount, CURRENCY_SCALE);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// Kind of commercial document built from line items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Billing,
    PurchaseOrder,
    InwardReceipt,
    Return,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Billing,
        DocumentKind::PurchaseOrder,
        DocumentKind::InwardReceipt,
        DocumentKind::Return,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Billing => "billing",
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::InwardReceipt => "inward_receipt",
            DocumentKind::Return => "return",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "billing" => Some(DocumentKind::Billing),
            "purchase_order" => Some(DocumentKind::PurchaseOrder),
            "inward_receipt" => Some(DocumentKind::InwardReceipt),
            "return" => Some(DocumentKind::Return),
            _ => None,
        }
    }

    /// URL path segment used by the document endpoints
    pub fn path_segment(&self) -> &'static str {
        match self {
            DocumentKind::Billing => "billing",
            DocumentKind::PurchaseOrder => "purchase-order",
            DocumentKind::InwardReceipt => "inward",
            DocumentKind::Return => "return",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.path_segment() == segment)
    }

    /// Which catalog price a new line snapshots
    pub fn price_basis(&self) -> PriceBasis {
        match self {
            DocumentKind::Billing | DocumentKind::Return => PriceBasis::Selling,
            DocumentKind::PurchaseOrder | DocumentKind::InwardReceipt => PriceBasis::Purchase,
        }
    }

    /// Prefix of the human-readable document number (e.g. "INW-000042")
    pub fn number_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Billing => "BIL",
            DocumentKind::PurchaseOrder => "PO",
            DocumentKind::InwardReceipt => "INW",
            DocumentKind::Return => "RET",
        }
    }

    /// Only inward receipts consume purchase-order pending quantity
    pub fn tracks_fulfillment(&self) -> bool {
        matches!(self, DocumentKind::InwardReceipt)
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Billing => write!(f, "Billing"),
            DocumentKind::PurchaseOrder => write!(f, "Purchase Order"),
            DocumentKind::InwardReceipt => write!(f, "Inward Receipt"),
            DocumentKind::Return => write!(f, "Return"),
        }
    }
}

/// Catalog price a document snapshots into its lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceBasis {
    /// Outbound documents (billing, returns)
    #[default]
    Selling,
    /// Inbound documents (purchase orders, inward receipts)
    Purchase,
}

impl PriceBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceBasis::Selling => "selling",
            PriceBasis::Purchase => "purchase",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "selling" => Some(PriceBasis::Selling),
            "purchase" => Some(PriceBasis::Purchase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_currency_half_away_from_zero() {
        assert_eq!(round_currency(dec("2.345")), dec("2.35"));
        assert_eq!(round_currency(dec("-2.345")), dec("-2.35"));
        assert_eq!(round_currency(dec("2.344")), dec("2.34"));
    }

    #[test]
    fn test_round_currency_pads_scale() {
        assert_eq!(round_currency(dec("236")).to_string(), "236.00");
        assert_eq!(round_currency(Decimal::ZERO).to_string(), "0.00");
    }

    #[test]
    fn test_storage_limits_match_column_precision() {
        assert_eq!(max_amount().to_string(), "999999999999.99");
        assert_eq!(max_quantity().to_string(), "99999999999.999");
        assert_eq!(max_tax_percentage().to_string(), "9999.99");
        assert!(exceeds_scale(dec("1.0005"), QUANTITY_SCALE));
        assert!(!exceeds_scale(dec("1.5000"), QUANTITY_SCALE));
        assert_eq!(round_to_scale(dec("0.125"), RATE_SCALE), dec("0.13"));
    }

    #[test]
    fn test_document_kind_path_segments() {
        for kind in DocumentKind::ALL {
            assert_eq!(DocumentKind::from_path_segment(kind.path_segment()), Some(kind));
            assert_eq!(DocumentKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(DocumentKind::from_path_segment("invoice"), None);
    }

    #[test]
    fn test_price_basis_by_kind() {
        assert_eq!(DocumentKind::Billing.price_basis(), PriceBasis::Selling);
        assert_eq!(DocumentKind::Return.price_basis(), PriceBasis::Selling);
        assert_eq!(DocumentKind::PurchaseOrder.price_basis(), PriceBasis::Purchase);
        assert_eq!(DocumentKind::InwardReceipt.price_basis(), PriceBasis::Purchase);
    }
}
