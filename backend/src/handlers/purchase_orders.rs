//! HTTP handlers for purchase orders received against

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::PurchaseOrderResponse;
use crate::services::PurchaseOrderService;
use crate::AppState;

/// Purchase order with live pending quantities
pub async fn get_purchase_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PurchaseOrderResponse>> {
    let service = PurchaseOrderService::new(state.db);
    let order = service.get_purchase_order(order_id).await?;
    Ok(Json(order))
}
