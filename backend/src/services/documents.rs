//! Document persistence: create, replace and fetch
//!
//! Submissions are re-validated and recomputed with the shared engine before
//! anything is written; client-sent tax and totals are never stored. Inward
//! receipts consume purchase-order pending quantity inside the same
//! transaction with a conditional decrement, so two concurrent receipts can
//! never over-receive a line.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::{
    aggregate_requests, recompute_summary, validate_submission, ConflictError, DocumentKind,
    FieldError, SubmitDocumentRequest, SubmitResponse, ValidationErrors,
};

use crate::error::{AppError, AppResult};
use crate::models::{
    DocumentHeader, DocumentItemRow, DocumentResponse, DocumentRow, EnginePolicy,
    FulfillmentState, LineItem,
};
use crate::services::purchase_orders::refresh_fulfillment_state;

pub const DOCUMENT_COLUMNS: &str = "id, kind, document_number, counterparty_id, \
    counterparty_name, document_date, status, remarks, reference_number, source_order_id, \
    fulfillment_state, line_count, total_quantity, subtotal, total_discount, total_tax, \
    grand_total, created_at, updated_at";

pub const ITEM_COLUMNS: &str = "id, document_id, position, product_id, product_code, \
    product_name, unit, quantity, unit_price, discount_amount, tax_percentage, tax_amount, \
    total_price, batch_number, expiry_date, source_line_id, pending_quantity";

/// Document service for all document kinds
#[derive(Clone)]
pub struct DocumentService {
    db: PgPool,
    policy: EnginePolicy,
}

impl DocumentService {
    pub fn new(db: PgPool, policy: EnginePolicy) -> Self {
        Self { db, policy }
    }

    /// Persist a new document
    pub async fn create_document(
        &self,
        kind: DocumentKind,
        request: SubmitDocumentRequest,
    ) -> AppResult<SubmitResponse> {
        let lines = validate_submission(kind, &request, &self.policy)?;
        let summary = recompute_summary(&lines);
        let header = request.header;
        let document_date = required_date(&header)?;

        // Start transaction
        let mut tx = self.db.begin().await?;

        check_products(&mut tx, &lines).await?;
        let document_number = next_document_number(&mut tx, kind).await?;

        let document_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO documents (kind, document_number, counterparty_id, counterparty_name,
                                   document_date, status, remarks, reference_number,
                                   source_order_id, fulfillment_state, line_count,
                                   total_quantity, subtotal, total_discount, total_tax,
                                   grand_total)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(&document_number)
        .bind(header.counterparty_id)
        .bind(&header.counterparty_name)
        .bind(document_date)
        .bind(&header.status)
        .bind(&header.remarks)
        .bind(&header.reference_number)
        .bind(header.source_order_id)
        .bind(initial_fulfillment_state(kind).map(|s| s.as_str()))
        .bind(summary.line_count as i32)
        .bind(summary.total_quantity)
        .bind(summary.subtotal)
        .bind(summary.total_discount)
        .bind(summary.total_tax)
        .bind(summary.grand_total)
        .fetch_one(&mut *tx)
        .await?;

        insert_items(&mut tx, document_id, kind, &lines).await?;

        if let (true, Some(order_id)) = (kind.tracks_fulfillment(), header.source_order_id) {
            reserve(&mut tx, order_id, &lines).await?;
        }

        tx.commit().await?;

        tracing::info!(
            kind = kind.as_str(),
            %document_id,
            number = %document_number,
            lines = summary.line_count,
            grand_total = %summary.grand_total,
            "document created"
        );

        Ok(SubmitResponse {
            id: document_id,
            success: true,
            document_number: Some(document_number),
        })
    }

    /// Replace header and lines of an existing document
    pub async fn update_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        request: SubmitDocumentRequest,
    ) -> AppResult<SubmitResponse> {
        let lines = validate_submission(kind, &request, &self.policy)?;
        let summary = recompute_summary(&lines);
        let header = request.header;
        let document_date = required_date(&header)?;

        // Start transaction
        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE id = $1 AND kind = $2 FOR UPDATE",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", kind, document_id)))?;

        check_products(&mut tx, &lines).await?;

        match kind {
            DocumentKind::PurchaseOrder => {
                let has_receipts = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM documents WHERE source_order_id = $1)",
                )
                .bind(document_id)
                .fetch_one(&mut *tx)
                .await?;

                if has_receipts {
                    return Err(AppError::BadRequest(format!(
                        "Purchase order {} already has receipts and can no longer be edited",
                        existing.document_number
                    )));
                }
            }
            DocumentKind::InwardReceipt => {
                // Give back what the previous version received
                let previous = sqlx::query_as::<_, DocumentItemRow>(&format!(
                    "SELECT {} FROM document_items WHERE document_id = $1",
                    ITEM_COLUMNS
                ))
                .bind(document_id)
                .fetch_all(&mut *tx)
                .await?;
                release(&mut tx, &previous).await?;
            }
            DocumentKind::Billing | DocumentKind::Return => {}
        }

        sqlx::query("DELETE FROM document_items WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE documents
            SET counterparty_id = $1, counterparty_name = $2, document_date = $3, status = $4,
                remarks = $5, reference_number = $6, source_order_id = $7,
                fulfillment_state = $8, line_count = $9, total_quantity = $10, subtotal = $11,
                total_discount = $12, total_tax = $13, grand_total = $14, updated_at = NOW()
            WHERE id = $15
            "#,
        )
        .bind(header.counterparty_id)
        .bind(&header.counterparty_name)
        .bind(document_date)
        .bind(&header.status)
        .bind(&header.remarks)
        .bind(&header.reference_number)
        .bind(header.source_order_id)
        .bind(initial_fulfillment_state(kind).map(|s| s.as_str()))
        .bind(summary.line_count as i32)
        .bind(summary.total_quantity)
        .bind(summary.subtotal)
        .bind(summary.total_discount)
        .bind(summary.total_tax)
        .bind(summary.grand_total)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        insert_items(&mut tx, document_id, kind, &lines).await?;

        if kind.tracks_fulfillment() {
            if let Some(order_id) = header.source_order_id {
                reserve(&mut tx, order_id, &lines).await?;
            }
            if let Some(previous_order) = existing.source_order_id {
                if header.source_order_id != Some(previous_order) {
                    refresh_fulfillment_state(&mut tx, previous_order).await?;
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            kind = kind.as_str(),
            %document_id,
            number = %existing.document_number,
            lines = summary.line_count,
            "document updated"
        );

        Ok(SubmitResponse {
            id: document_id,
            success: true,
            document_number: Some(existing.document_number),
        })
    }

    /// Stored document with its lines
    pub async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> AppResult<DocumentResponse> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE id = $1 AND kind = $2",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .bind(kind.as_str())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", kind, document_id)))?;

        let items = sqlx::query_as::<_, DocumentItemRow>(&format!(
            "SELECT {} FROM document_items WHERE document_id = $1 ORDER BY position",
            ITEM_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.db)
        .await?;

        Ok(DocumentResponse {
            id: row.id,
            kind,
            document_number: Some(row.document_number.clone()),
            header: row.header(),
            items: items.into_iter().map(DocumentItemRow::into_persisted).collect(),
            summary: Some(row.summary()),
        })
    }
}

/// Human-readable number, e.g. `INW-000042`
pub fn format_document_number(kind: DocumentKind, sequence: i64) -> String {
    format!("{}-{:06}", kind.number_prefix(), sequence)
}

/// Per source line totals of an inward receipt
pub fn receipt_requests(lines: &[LineItem]) -> Vec<(Uuid, Decimal)> {
    let requests: Vec<(Uuid, Decimal)> = lines
        .iter()
        .filter_map(|l| l.source_line_id.map(|id| (id, l.quantity)))
        .collect();
    aggregate_requests(&requests)
}

fn initial_fulfillment_state(kind: DocumentKind) -> Option<FulfillmentState> {
    (kind == DocumentKind::PurchaseOrder).then_some(FulfillmentState::Open)
}

fn required_date(header: &DocumentHeader) -> AppResult<NaiveDate> {
    header.document_date.ok_or_else(|| {
        AppError::Validation(ValidationErrors::single(FieldError::header(
            "document_date",
            "date is required",
        )))
    })
}

async fn next_document_number(
    tx: &mut Transaction<'_, Postgres>,
    kind: DocumentKind,
) -> AppResult<String> {
    let sequence = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO document_sequences (kind, last_value) VALUES ($1, 1)
        ON CONFLICT (kind) DO UPDATE SET last_value = document_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(kind.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(format_document_number(kind, sequence))
}

/// Every line must reference an existing product
async fn check_products(tx: &mut Transaction<'_, Postgres>, lines: &[LineItem]) -> AppResult<()> {
    let ids: Vec<Uuid> = lines.iter().filter_map(|l| l.product_id).collect();
    let known = sqlx::query_scalar::<_, Uuid>("SELECT id FROM products WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;

    let errors: Vec<FieldError> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.product_id.is_some_and(|id| !known.contains(&id)))
        .map(|(i, _)| FieldError::line(i, "product_id", "unknown product"))
        .collect();
    ValidationErrors(errors).into_result().map_err(AppError::from)
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    document_id: Uuid,
    kind: DocumentKind,
    lines: &[LineItem],
) -> AppResult<()> {
    for (position, line) in lines.iter().enumerate() {
        // Purchase-order lines start fully pending
        let pending = (kind == DocumentKind::PurchaseOrder).then_some(line.quantity);

        sqlx::query(
            r#"
            INSERT INTO document_items (document_id, position, product_id, product_code,
                                        product_name, unit, quantity, unit_price,
                                        discount_amount, tax_percentage, tax_amount,
                                        total_price, batch_number, expiry_date,
                                        source_line_id, pending_quantity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(document_id)
        .bind(position as i32)
        .bind(line.product_id)
        .bind(&line.product_code)
        .bind(&line.product_name)
        .bind(&line.unit)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.discount_amount)
        .bind(line.tax_percentage)
        .bind(line.tax_amount)
        .bind(line.total_price)
        .bind(&line.batch_number)
        .bind(line.expiry_date)
        .bind(line.source_line_id)
        .bind(pending)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Consume pending quantity on the source order, all lines or none
///
/// An error drops the transaction, which rolls back every decrement made
/// so far.
async fn reserve(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    lines: &[LineItem],
) -> AppResult<FulfillmentState> {
    // Serializes receipts against the same order
    let kind = sqlx::query_scalar::<_, String>("SELECT kind FROM documents WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

    if kind != DocumentKind::PurchaseOrder.as_str() {
        return Err(AppError::Validation(ValidationErrors::single(
            FieldError::header("source_order_id", "is not a purchase order"),
        )));
    }

    for (line_id, requested) in receipt_requests(lines) {
        let remaining = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE document_items
            SET pending_quantity = pending_quantity - $1
            WHERE id = $2 AND document_id = $3 AND pending_quantity >= $1
            RETURNING pending_quantity
            "#,
        )
        .bind(requested)
        .bind(line_id)
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

        if remaining.is_some() {
            continue;
        }

        let pending = sqlx::query_scalar::<_, Option<Decimal>>(
            "SELECT pending_quantity FROM document_items WHERE id = $1 AND document_id = $2",
        )
        .bind(line_id)
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

        return Err(match pending {
            None => {
                let index = lines
                    .iter()
                    .position(|l| l.source_line_id == Some(line_id))
                    .unwrap_or_default();
                AppError::Validation(ValidationErrors::single(FieldError::line(
                    index,
                    "source_line_id",
                    "is not a line of the purchase order",
                )))
            }
            Some(pending) => {
                let pending = pending.unwrap_or_default();
                tracing::warn!(
                    %order_id,
                    %line_id,
                    %requested,
                    %pending,
                    "receipt exceeds pending quantity"
                );
                AppError::Conflict(ConflictError {
                    source_order_id: Some(order_id),
                    source_line_id: Some(line_id),
                    message: format!(
                        "Requested {} exceeds pending quantity {}",
                        requested, pending
                    ),
                })
            }
        });
    }

    refresh_fulfillment_state(tx, order_id).await
}

/// Return quantities a previous version of a receipt consumed
async fn release(tx: &mut Transaction<'_, Postgres>, items: &[DocumentItemRow]) -> AppResult<()> {
    let requests: Vec<(Uuid, Decimal)> = items
        .iter()
        .filter_map(|i| i.source_line_id.map(|id| (id, i.quantity)))
        .collect();

    for (line_id, quantity) in aggregate_requests(&requests) {
        sqlx::query(
            r#"
            UPDATE document_items
            SET pending_quantity = LEAST(pending_quantity + $1, quantity)
            WHERE id = $2
            "#,
        )
        .bind(quantity)
        .bind(line_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}


// ============================================================================
// Database Tests
// ============================================================================

#[cfg(test)]
mod db_tests {
    use super::*;
    use std::str::FromStr;

    use shared::SubmitItem;

    use crate::models::PriceBasis;
    use crate::services::catalog::CatalogService;
    use crate::services::purchase_orders::PurchaseOrderService;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn seed_product(db: &PgPool) -> Uuid {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO products (code, name, unit, selling_price, purchase_price, tax_percentage)
            VALUES ('RICE-25', 'Rice 25kg', 'bag', 1500, 1200, 5)
            RETURNING id
            "#,
        )
        .fetch_one(db)
        .await
        .unwrap()
    }

    fn item(product_id: Uuid, quantity: &str, source_line_id: Option<Uuid>) -> SubmitItem {
        SubmitItem {
            product_id,
            product_code: Some("RICE-25".to_string()),
            product_name: "Rice 25kg".to_string(),
            unit: Some("bag".to_string()),
            quantity: dec(quantity),
            unit_price: dec("1200"),
            discount_amount: Decimal::ZERO,
            tax_percentage: dec("5"),
            tax_amount: Decimal::ZERO,
            total_price: Decimal::ZERO,
            batch_number: None,
            expiry_date: None,
            source_line_id,
        }
    }

    fn request(source_order_id: Option<Uuid>, items: Vec<SubmitItem>) -> SubmitDocumentRequest {
        SubmitDocumentRequest {
            header: DocumentHeader {
                counterparty_name: Some("Rice Mills Ltd".to_string()),
                document_date: NaiveDate::from_ymd_opt(2024, 3, 1),
                source_order_id,
                ..Default::default()
            },
            items,
        }
    }

    /// Purchase order for 100 bags; returns the order id and its line id
    async fn seed_order(
        service: &DocumentService,
        orders: &PurchaseOrderService,
        product_id: Uuid,
    ) -> (Uuid, Uuid) {
        let order = request(None, vec![item(product_id, "100", None)]);
        let created = service
            .create_document(DocumentKind::PurchaseOrder, order)
            .await
            .unwrap();
        let order = orders.get_purchase_order(created.id).await.unwrap();
        assert_eq!(order.items[0].pending_quantity, dec("100"));
        (created.id, order.items[0].line_id)
    }

    async fn order_state(db: &PgPool, order_id: Uuid) -> Option<String> {
        sqlx::query_scalar::<_, Option<String>>(
            "SELECT fulfillment_state FROM documents WHERE id = $1",
        )
        .bind(order_id)
        .fetch_one(db)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // Requires PostgreSQL
    async fn test_concurrent_receipts_never_over_receive(db: PgPool) {
        let service = DocumentService::new(db.clone(), EnginePolicy::default());
        let orders = PurchaseOrderService::new(db.clone());
        let product_id = seed_product(&db).await;
        let (order_id, line_id) = seed_order(&service, &orders, product_id).await;

        let receipt = || request(Some(order_id), vec![item(product_id, "60", Some(line_id))]);
        let (first, second) = tokio::join!(
            service.create_document(DocumentKind::InwardReceipt, receipt()),
            service.create_document(DocumentKind::InwardReceipt, receipt()),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(rejected, AppError::Conflict(_)));
        assert_eq!(rejected.status(), axum::http::StatusCode::CONFLICT);

        let order = orders.get_purchase_order(order_id).await.unwrap();
        assert_eq!(order.items[0].pending_quantity, dec("40"));
        assert_eq!(order_state(&db, order_id).await.as_deref(), Some("partially_received"));

        // Only the accepted receipt was stored
        let receipts = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM documents WHERE source_order_id = $1",
        )
        .bind(order_id)
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(receipts, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // Requires PostgreSQL
    async fn test_receipt_edit_releases_then_reserves(db: PgPool) {
        let service = DocumentService::new(db.clone(), EnginePolicy::default());
        let orders = PurchaseOrderService::new(db.clone());
        let product_id = seed_product(&db).await;
        let (order_id, line_id) = seed_order(&service, &orders, product_id).await;

        let receipt = |quantity: &str| {
            request(Some(order_id), vec![item(product_id, quantity, Some(line_id))])
        };
        let created = service
            .create_document(DocumentKind::InwardReceipt, receipt("60"))
            .await
            .unwrap();

        // Its own 60 is credited back before the new 100 is taken
        service
            .update_document(DocumentKind::InwardReceipt, created.id, receipt("100"))
            .await
            .unwrap();
        let order = orders.get_purchase_order(order_id).await.unwrap();
        assert_eq!(order.items[0].pending_quantity, Decimal::ZERO);
        assert_eq!(order_state(&db, order_id).await.as_deref(), Some("fulfilled"));

        let err = service
            .update_document(DocumentKind::InwardReceipt, created.id, receipt("120"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // The failed edit rolled back its release as well
        let order = orders.get_purchase_order(order_id).await.unwrap();
        assert_eq!(order.items[0].pending_quantity, Decimal::ZERO);
        let stored = service
            .get_document(DocumentKind::InwardReceipt, created.id)
            .await
            .unwrap();
        assert_eq!(stored.items[0].quantity, dec("100"));

        let err = service
            .update_document(
                DocumentKind::PurchaseOrder,
                order_id,
                request(None, vec![item(product_id, "150", None)]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore] // Requires PostgreSQL
    async fn test_inactive_products_are_not_resolved(db: PgPool) {
        let catalog = CatalogService::new(db.clone());
        let product_id = seed_product(&db).await;
        let found = catalog.find_by_id(product_id, PriceBasis::Purchase).await.unwrap();
        assert_eq!(found.unit_price, dec("1200"));

        sqlx::query("UPDATE products SET is_active = FALSE WHERE id = $1")
            .bind(product_id)
            .execute(&db)
            .await
            .unwrap();

        let by_id = catalog.find_by_id(product_id, PriceBasis::Purchase).await;
        assert!(matches!(by_id, Err(AppError::NotFound(_))));
        let by_code = catalog.find_by_code("RICE-25", PriceBasis::Purchase).await;
        assert!(matches!(by_code, Err(AppError::NotFound(_))));
    }
}
