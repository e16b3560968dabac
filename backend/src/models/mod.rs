//! Database models for the Stockdesk server
//!
//! Re-exports the engine types from the shared crate and adds the row types
//! read with `sqlx::query_as`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

pub use shared::models::*;
pub use shared::{
    DocumentResponse, PersistedItem, PriceBasis, PurchaseOrderItem, PurchaseOrderResponse,
};

/// Catalog row; both prices are kept, the basis picks one
#[derive(Debug, Clone, FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub code: Option<String>,
    pub name: String,
    pub unit: Option<String>,
    pub selling_price: Decimal,
    pub purchase_price: Decimal,
    pub tax_percentage: Decimal,
    pub category: Option<String>,
}

impl ProductRow {
    pub fn into_product(self, basis: PriceBasis) -> CatalogProduct {
        let unit_price = match basis {
            PriceBasis::Selling => self.selling_price,
            PriceBasis::Purchase => self.purchase_price,
        };
        CatalogProduct {
            id: self.id,
            code: self.code.filter(|c| !c.trim().is_empty()),
            name: self.name,
            unit: self.unit,
            unit_price,
            tax_percentage: self.tax_percentage,
            category: self.category,
        }
    }
}

/// Document header row
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub kind: String,
    pub document_number: String,
    pub counterparty_id: Option<Uuid>,
    pub counterparty_name: Option<String>,
    pub document_date: NaiveDate,
    pub status: Option<String>,
    pub remarks: Option<String>,
    pub reference_number: Option<String>,
    pub source_order_id: Option<Uuid>,
    pub fulfillment_state: Option<String>,
    pub line_count: i32,
    pub total_quantity: Decimal,
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub grand_total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRow {
    pub fn header(&self) -> DocumentHeader {
        DocumentHeader {
            counterparty_id: self.counterparty_id,
            counterparty_name: self.counterparty_name.clone(),
            document_date: Some(self.document_date),
            status: self.status.clone(),
            remarks: self.remarks.clone(),
            reference_number: self.reference_number.clone(),
            source_order_id: self.source_order_id,
        }
    }

    /// Stored totals
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            line_count: usize::try_from(self.line_count).unwrap_or_default(),
            total_quantity: self.total_quantity,
            subtotal: self.subtotal,
            total_discount: self.total_discount,
            total_tax: self.total_tax,
            grand_total: self.grand_total,
        }
    }
}

/// Document line row
#[derive(Debug, Clone, FromRow)]
pub struct DocumentItemRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    pub product_code: Option<String>,
    pub product_name: String,
    pub unit: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub total_price: Decimal,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub source_line_id: Option<Uuid>,
    pub pending_quantity: Option<Decimal>,
}

impl DocumentItemRow {
    pub fn into_persisted(self) -> PersistedItem {
        PersistedItem {
            id: Some(self.id),
            product_id: Some(self.product_id),
            product_code: self.product_code,
            product_name: self.product_name,
            unit: self.unit,
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount_amount: self.discount_amount,
            tax_percentage: self.tax_percentage,
            tax_amount: Some(self.tax_amount),
            total_price: Some(self.total_price),
            batch_number: self.batch_number,
            expiry_date: self.expiry_date,
            source_line_id: self.source_line_id,
        }
    }

    /// Purchase-order line as offered to an inward receipt
    pub fn into_order_item(self) -> PurchaseOrderItem {
        PurchaseOrderItem {
            line_id: self.id,
            product_id: self.product_id,
            product_code: self.product_code,
            product_name: self.product_name,
            unit: self.unit,
            ordered_quantity: self.quantity,
            pending_quantity: self.pending_quantity.unwrap_or(self.quantity),
            unit_price: self.unit_price,
            tax_percentage: self.tax_percentage,
        }
    }

    pub fn fulfillment_state(&self) -> FulfillmentState {
        FulfillmentState::of(self.quantity, self.pending_quantity.unwrap_or(self.quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item_row(quantity: &str, pending: Option<&str>) -> DocumentItemRow {
        DocumentItemRow {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            position: 0,
            product_id: Uuid::new_v4(),
            product_code: Some("RICE-25".to_string()),
            product_name: "Rice 25kg".to_string(),
            unit: None,
            quantity: dec(quantity),
            unit_price: dec("1200"),
            discount_amount: Decimal::ZERO,
            tax_percentage: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total_price: dec("120000"),
            batch_number: None,
            expiry_date: None,
            source_line_id: None,
            pending_quantity: pending.map(dec),
        }
    }

    #[test]
    fn test_product_row_price_basis() {
        let row = ProductRow {
            id: Uuid::new_v4(),
            code: Some(" ".to_string()),
            name: "Sugar".to_string(),
            unit: Some("kg".to_string()),
            selling_price: dec("55"),
            purchase_price: dec("48.5"),
            tax_percentage: dec("5"),
            category: None,
        };
        assert_eq!(row.clone().into_product(PriceBasis::Selling).unit_price, dec("55"));
        let purchase = row.into_product(PriceBasis::Purchase);
        assert_eq!(purchase.unit_price, dec("48.5"));
        assert_eq!(purchase.code, None);
    }

    #[test]
    fn test_order_item_pending() {
        let item = item_row("100", Some("60")).into_order_item();
        assert_eq!(item.ordered_quantity, dec("100"));
        assert_eq!(item.pending_quantity, dec("60"));
        assert_eq!(
            item_row("100", Some("60")).fulfillment_state(),
            FulfillmentState::PartiallyReceived
        );
        assert_eq!(item_row("5", None).fulfillment_state(), FulfillmentState::Open);
    }
}
