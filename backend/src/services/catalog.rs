//! Product lookup for the scan and search paths

use shared::rank_candidates;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{CatalogProduct, PriceBasis, ProductRow};

/// Upper bound on search results
pub const MAX_SEARCH_LIMIT: usize = 50;

const PRODUCT_COLUMNS: &str = "id, code, name, unit, selling_price, purchase_price, \
                               tax_percentage, category";

/// Catalog service backed by the products table
#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

impl CatalogService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Exact code match, as sent by a barcode scanner
    pub async fn find_by_code(&self, code: &str, basis: PriceBasis) -> AppResult<CatalogProduct> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::BadRequest("Product code is empty".to_string()));
        }

        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE code = $1 AND is_active",
            PRODUCT_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Product with code '{}'", code)))?;

        Ok(row.into_product(basis))
    }

    pub async fn find_by_id(&self, id: Uuid, basis: PriceBasis) -> AppResult<CatalogProduct> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = $1 AND is_active",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        Ok(row.into_product(basis))
    }

    /// Code-prefix or name-substring search, best matches first
    pub async fn search(
        &self,
        text: &str,
        limit: usize,
        basis: PriceBasis,
    ) -> AppResult<Vec<CatalogProduct>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let pattern = like_pattern(text);

        // Over-fetch so ranking can move exact code hits to the front
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            SELECT {}
            FROM products
            WHERE is_active
              AND (code ILIKE $1 || '%' ESCAPE '\' OR name ILIKE '%' || $1 || '%' ESCAPE '\')
            ORDER BY name
            LIMIT $2
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&pattern)
        .bind((limit * 4) as i64)
        .fetch_all(&self.db)
        .await?;

        let products = rows.into_iter().map(|row| row.into_product(basis));
        Ok(rank_candidates(products, text, limit))
    }
}

/// Escape LIKE wildcards in user input
pub fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
