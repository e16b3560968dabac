//! Purchase orders as sources for inward receipts

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DocumentItemRow, DocumentRow, FulfillmentState, PurchaseOrderResponse};
use crate::services::documents::{DOCUMENT_COLUMNS, ITEM_COLUMNS};

#[derive(Clone)]
pub struct PurchaseOrderService {
    db: PgPool,
}

impl PurchaseOrderService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Order header and lines with their live pending quantities
    pub async fn get_purchase_order(&self, order_id: Uuid) -> AppResult<PurchaseOrderResponse> {
        let order = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE id = $1 AND kind = 'purchase_order'",
            DOCUMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase order".to_string()))?;

        let items = sqlx::query_as::<_, DocumentItemRow>(&format!(
            "SELECT {} FROM document_items WHERE document_id = $1 ORDER BY position",
            ITEM_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(PurchaseOrderResponse {
            id: order.id,
            document_number: Some(order.document_number.clone()),
            header: order.header(),
            items: items.into_iter().map(DocumentItemRow::into_order_item).collect(),
        })
    }
}

/// Recompute and store an order's fulfillment state from its lines
pub async fn refresh_fulfillment_state(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> AppResult<FulfillmentState> {
    let items = sqlx::query_as::<_, DocumentItemRow>(&format!(
        "SELECT {} FROM document_items WHERE document_id = $1",
        ITEM_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut **tx)
    .await?;

    let state = FulfillmentState::aggregate(items.iter().map(DocumentItemRow::fulfillment_state));

    sqlx::query(
        "UPDATE documents SET fulfillment_state = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(state.as_str())
    .bind(order_id)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(%order_id, state = state.as_str(), "purchase order state refreshed");
    Ok(state)
}
