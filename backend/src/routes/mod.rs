//! Route definitions for the Stockdesk server

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/products", product_routes())
        .nest("/purchase-orders", purchase_order_routes())
        .nest("/documents", document_routes())
}

/// Catalog lookup routes
fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(handlers::search_products))
        .route("/code/:code", get(handlers::get_product_by_code))
        .route("/:product_id", get(handlers::get_product))
}

/// Purchase order routes
fn purchase_order_routes() -> Router<AppState> {
    Router::new().route("/:order_id", get(handlers::get_purchase_order))
}

/// Document routes, one set per kind segment
fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/:kind", post(handlers::create_document))
        .route(
            "/:kind/:document_id",
            get(handlers::get_document).put(handlers::update_document),
        )
}
