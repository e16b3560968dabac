//! HTTP handlers for product lookup

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{CatalogProduct, PriceBasis};
use crate::services::CatalogService;
use crate::AppState;

const DEFAULT_SEARCH_LIMIT: usize = 20;

/// `?basis=selling|purchase`
#[derive(Debug, Default, Deserialize)]
pub struct PriceBasisQuery {
    pub basis: Option<String>,
}

impl PriceBasisQuery {
    pub fn basis(&self) -> AppResult<PriceBasis> {
        match self.basis.as_deref() {
            None | Some("") => Ok(PriceBasis::default()),
            Some(s) => PriceBasis::from_str(s)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown price basis '{}'", s))),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchQuery {
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub q: String,
    #[validate(range(min = 1, max = 50, message = "must be between 1 and 50"))]
    pub limit: Option<usize>,
    pub basis: Option<String>,
}

/// Scanner / Enter-key lookup by exact code
pub async fn get_product_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<PriceBasisQuery>,
) -> AppResult<Json<CatalogProduct>> {
    let service = CatalogService::new(state.db);
    let product = service.find_by_code(&code, query.basis()?).await?;
    Ok(Json(product))
}

/// Lookup of a product picked from the search list
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<PriceBasisQuery>,
) -> AppResult<Json<CatalogProduct>> {
    let service = CatalogService::new(state.db);
    let product = service.find_by_id(product_id, query.basis()?).await?;
    Ok(Json(product))
}

/// Ranked free-text search
pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<CatalogProduct>>> {
    query
        .validate()
        .map_err(|e| AppError::BadRequest(format!("Invalid search: {}", e)))?;
    let basis = PriceBasisQuery {
        basis: query.basis.clone(),
    }
    .basis()?;
    let service = CatalogService::new(state.db);
    let products = service
        .search(&query.q, query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT), basis)
        .await?;
    Ok(Json(products))
}
