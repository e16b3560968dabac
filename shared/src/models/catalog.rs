//! Catalog products and product resolution
//!
//! Upstream product payloads come in several shapes (`name` vs
//! `product_name`, prices as numbers or strings, ...). [`RawProduct`] accepts
//! all of them and [`RawProduct::normalize`] turns any of them into one
//! [`CatalogProduct`], so the rest of the engine only ever sees the canonical
//! shape.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::LineKey;
use crate::error::ResolutionError;
use crate::types::{
    max_amount, max_tax_percentage, round_to_scale, PriceBasis, CURRENCY_SCALE, RATE_SCALE,
};

/// Canonical product snapshot taken at resolution time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub code: Option<String>,
    pub name: String,
    pub unit: Option<String>,
    /// Selling or purchase price, depending on the basis it was resolved with
    pub unit_price: Decimal,
    pub tax_percentage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl CatalogProduct {
    /// Merge identity of lines created from this product
    pub fn line_key(&self) -> LineKey {
        LineKey::for_product(self.code.as_deref(), self.id)
    }
}

/// What the user scanned, typed or picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ProductQuery {
    /// Barcode scan or Enter-key code entry
    Code(String),
    Id(Uuid),
    /// Free-text search on code and name
    Text(String),
}

impl ProductQuery {
    pub fn describe(&self) -> String {
        match self {
            ProductQuery::Code(code) => format!("code '{}'", code.trim()),
            ProductQuery::Id(id) => format!("product {}", id),
            ProductQuery::Text(text) => format!("'{}'", text.trim()),
        }
    }
}

/// Product record as returned by any version of the catalog service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProduct {
    #[serde(default, alias = "product_id", alias = "productId", alias = "_id")]
    pub id: Option<Uuid>,
    #[serde(
        default,
        alias = "product_code",
        alias = "productCode",
        alias = "barcode",
        alias = "sku"
    )]
    pub code: Option<String>,
    #[serde(
        default,
        alias = "product_name",
        alias = "productName",
        alias = "item_name"
    )]
    pub name: Option<String>,
    #[serde(default, alias = "unit_name", alias = "uom")]
    pub unit: Option<String>,
    #[serde(
        default,
        alias = "sellingPrice",
        alias = "sale_price",
        alias = "mrp",
        deserialize_with = "lenient_decimal"
    )]
    pub selling_price: Option<Decimal>,
    #[serde(
        default,
        alias = "purchasePrice",
        alias = "cost_price",
        deserialize_with = "lenient_decimal"
    )]
    pub purchase_price: Option<Decimal>,
    #[serde(
        default,
        alias = "taxPercentage",
        alias = "tax_rate",
        alias = "gst",
        alias = "tax",
        deserialize_with = "lenient_decimal"
    )]
    pub tax_percentage: Option<Decimal>,
    #[serde(default, alias = "category_name", alias = "categoryName")]
    pub category: Option<String>,
}

/// Accept JSON numbers, numeric strings, blanks and nulls
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => parse_decimal(&n.to_string())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid number {}", n))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => parse_decimal(s.trim())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid number '{}'", s))),
        Some(other) => Err(de::Error::custom(format!("expected a number, got {}", other))),
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn malformed(reason: &str) -> ResolutionError {
    ResolutionError::Malformed {
        reason: reason.to_string(),
    }
}

impl RawProduct {
    /// Map an upstream record into the canonical product for one price basis
    ///
    /// A missing price for the requested basis falls back to the other price,
    /// then to zero. A missing tax percentage is zero. Price and tax are
    /// rounded to their stored scale.
    pub fn normalize(self, basis: PriceBasis) -> Result<CatalogProduct, ResolutionError> {
        let id = self.id.ok_or_else(|| malformed("missing product id"))?;
        let code = non_blank(self.code);
        let name = non_blank(self.name)
            .or_else(|| code.clone())
            .ok_or_else(|| malformed("missing product name"))?;

        let (primary, fallback) = match basis {
            PriceBasis::Selling => (self.selling_price, self.purchase_price),
            PriceBasis::Purchase => (self.purchase_price, self.selling_price),
        };
        let unit_price =
            round_to_scale(primary.or(fallback).unwrap_or(Decimal::ZERO), CURRENCY_SCALE);
        if unit_price < Decimal::ZERO {
            return Err(malformed("negative price"));
        }
        if unit_price > max_amount() {
            return Err(malformed("price too large"));
        }

        let tax_percentage =
            round_to_scale(self.tax_percentage.unwrap_or(Decimal::ZERO), RATE_SCALE);
        if tax_percentage < Decimal::ZERO {
            return Err(malformed("negative tax percentage"));
        }
        if tax_percentage > max_tax_percentage() {
            return Err(malformed("tax percentage too large"));
        }

        Ok(CatalogProduct {
            id,
            code,
            name,
            unit: non_blank(self.unit),
            unit_price,
            tax_percentage,
            category: non_blank(self.category),
        })
    }
}

/// Read-only product lookup
pub trait CatalogResolver {
    /// Resolve one product; code and id lookups never guess between matches
    fn resolve(&self, query: &ProductQuery) -> Result<CatalogProduct, ResolutionError>;

    /// Ranked candidates for user selection
    fn search(&self, text: &str, limit: usize) -> Vec<CatalogProduct>;
}

/// How well a product matches a free-text query (lower is better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    ExactCode,
    CodePrefix,
    NamePrefix,
    NameContains,
}

pub fn match_rank(product: &CatalogProduct, text: &str) -> Option<MatchRank> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let code = product.code.as_deref().map(str::to_lowercase);
    let name = product.name.to_lowercase();

    match code.as_deref() {
        Some(c) if c == needle => Some(MatchRank::ExactCode),
        Some(c) if c.starts_with(&needle) => Some(MatchRank::CodePrefix),
        _ if name.starts_with(&needle) => Some(MatchRank::NamePrefix),
        _ if name.contains(&needle) => Some(MatchRank::NameContains),
        _ => None,
    }
}

/// Rank products for a free-text query: exact code, code prefix, name
/// prefix, then name substring; ties by name, then code
pub fn rank_candidates<I>(products: I, text: &str, limit: usize) -> Vec<CatalogProduct>
where
    I: IntoIterator<Item = CatalogProduct>,
{
    let mut ranked: Vec<(MatchRank, CatalogProduct)> = products
        .into_iter()
        .filter_map(|p| match_rank(&p, text).map(|rank| (rank, p)))
        .collect();

    ranked.sort_by(|(ra, a), (rb, b)| {
        ra.cmp(rb)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.code.cmp(&b.code))
    });

    ranked.into_iter().take(limit).map(|(_, p)| p).collect()
}

/// In-memory catalog used by the browser engine and by tests
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    products: Vec<CatalogProduct>,
    by_id: HashMap<Uuid, usize>,
    /// Positions per code, ascending
    by_code: HashMap<String, Vec<usize>>,
}

impl CatalogIndex {
    pub fn new(products: Vec<CatalogProduct>) -> Self {
        let mut index = Self {
            products: Vec::with_capacity(products.len()),
            by_id: HashMap::with_capacity(products.len()),
            by_code: HashMap::with_capacity(products.len()),
        };
        for product in products {
            index.insert(product);
        }
        index
    }

    /// Build from upstream records, returning the records that failed to normalize
    pub fn from_raw(raw: Vec<RawProduct>, basis: PriceBasis) -> (Self, Vec<ResolutionError>) {
        let mut rejected = Vec::new();
        let mut products = Vec::with_capacity(raw.len());
        for record in raw {
            match record.normalize(basis) {
                Ok(product) => products.push(product),
                Err(e) => rejected.push(e),
            }
        }
        if !rejected.is_empty() {
            tracing::warn!("Skipped {} malformed catalog records", rejected.len());
        }
        (Self::new(products), rejected)
    }

    /// Add a product, replacing any product with the same id
    pub fn insert(&mut self, product: CatalogProduct) {
        match self.by_id.get(&product.id).copied() {
            Some(pos) => {
                self.unindex_code(pos);
                self.products[pos] = product;
                self.index_code(pos);
            }
            None => {
                let pos = self.products.len();
                self.by_id.insert(product.id, pos);
                self.products.push(product);
                self.index_code(pos);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn index_code(&mut self, pos: usize) {
        if let Some(code) = &self.products[pos].code {
            let slots = self.by_code.entry(code.clone()).or_default();
            if let Err(at) = slots.binary_search(&pos) {
                slots.insert(at, pos);
            }
        }
    }

    fn unindex_code(&mut self, pos: usize) {
        if let Some(code) = &self.products[pos].code {
            if let Some(slots) = self.by_code.get_mut(code) {
                slots.retain(|&i| i != pos);
                if slots.is_empty() {
                    self.by_code.remove(code);
                }
            }
        }
    }
}

impl CatalogResolver for CatalogIndex {
    fn resolve(&self, query: &ProductQuery) -> Result<CatalogProduct, ResolutionError> {
        let not_found = || ResolutionError::NotFound {
            query: query.describe(),
        };

        match query {
            ProductQuery::Code(code) => {
                let matches = self.by_code.get(code.trim()).ok_or_else(not_found)?;
                match matches.as_slice() {
                    [single] => Ok(self.products[*single].clone()),
                    [] => Err(not_found()),
                    many => Err(ResolutionError::Ambiguous {
                        query: query.describe(),
                        candidates: many.iter().map(|&i| self.products[i].clone()).collect(),
                    }),
                }
            }
            ProductQuery::Id(id) => self
                .by_id
                .get(id)
                .map(|&i| self.products[i].clone())
                .ok_or_else(not_found),
            ProductQuery::Text(text) => {
                let ranked: Vec<(MatchRank, &CatalogProduct)> = self
                    .products
                    .iter()
                    .filter_map(|p| match_rank(p, text).map(|r| (r, p)))
                    .collect();
                let best = ranked.iter().map(|(r, _)| *r).min().ok_or_else(not_found)?;
                let top: Vec<&CatalogProduct> = ranked
                    .iter()
                    .filter(|(r, _)| *r == best)
                    .map(|(_, p)| *p)
                    .collect();
                if let [single] = top.as_slice() {
                    Ok((*single).clone())
                } else {
                    Err(ResolutionError::Ambiguous {
                        query: query.describe(),
                        candidates: self.search(text, 20),
                    })
                }
            }
        }
    }

    fn search(&self, text: &str, limit: usize) -> Vec<CatalogProduct> {
        rank_candidates(self.products.iter().cloned(), text, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn product(code: &str, name: &str, price: &str) -> CatalogProduct {
        CatalogProduct {
            id: Uuid::new_v4(),
            code: Some(code.to_string()),
            name: name.to_string(),
            unit: Some("pcs".to_string()),
            unit_price: dec(price),
            tax_percentage: dec("18"),
            category: None,
        }
    }

    fn sample_index() -> CatalogIndex {
        CatalogIndex::new(vec![
            product("P100", "Paracetamol 500mg", "100"),
            product("P1001", "Pain Relief Gel", "45.50"),
            product("A200", "Antacid Syrup", "80"),
            product("C300", "Vitamin C Tablets", "120"),
        ])
    }

    #[test]
    fn test_normalize_snake_case_shape() {
        let raw: RawProduct = serde_json::from_value(serde_json::json!({
            "product_id": "3f2b8d4e-6c1a-4e0b-9b55-2f7c1d9a0e11",
            "product_code": " P100 ",
            "product_name": "Paracetamol",
            "uom": "strip",
            "sale_price": "100.00",
            "cost_price": 62.5,
            "gst": 18,
            "category_name": "Pharma"
        }))
        .unwrap();

        let selling = raw.clone().normalize(PriceBasis::Selling).unwrap();
        assert_eq!(selling.code.as_deref(), Some("P100"));
        assert_eq!(selling.unit.as_deref(), Some("strip"));
        assert_eq!(selling.unit_price, dec("100"));
        assert_eq!(selling.tax_percentage, dec("18"));
        assert_eq!(selling.category.as_deref(), Some("Pharma"));

        let purchase = raw.normalize(PriceBasis::Purchase).unwrap();
        assert_eq!(purchase.unit_price, dec("62.5"));
    }

    #[test]
    fn test_normalize_camel_case_shape() {
        let raw: RawProduct = serde_json::from_value(serde_json::json!({
            "productId": "3f2b8d4e-6c1a-4e0b-9b55-2f7c1d9a0e11",
            "productCode": "A200",
            "productName": "Antacid",
            "sellingPrice": 80,
            "taxPercentage": ""
        }))
        .unwrap();

        let product = raw.normalize(PriceBasis::Selling).unwrap();
        assert_eq!(product.name, "Antacid");
        assert_eq!(product.tax_percentage, Decimal::ZERO);
    }

    #[test]
    fn test_normalize_price_fallback() {
        let raw = RawProduct {
            id: Some(Uuid::new_v4()),
            name: Some("Gauze".to_string()),
            selling_price: Some(dec("12")),
            ..Default::default()
        };
        let product = raw.normalize(PriceBasis::Purchase).unwrap();
        assert_eq!(product.unit_price, dec("12"));
        assert_eq!(product.code, None);
    }

    #[test]
    fn test_normalize_rejects_missing_id_and_negative_price() {
        let raw = RawProduct {
            name: Some("Orphan".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            raw.normalize(PriceBasis::Selling),
            Err(ResolutionError::Malformed { .. })
        ));

        let raw = RawProduct {
            id: Some(Uuid::new_v4()),
            name: Some("Broken".to_string()),
            selling_price: Some(dec("-1")),
            ..Default::default()
        };
        assert!(raw.normalize(PriceBasis::Selling).is_err());
    }

    #[test]
    fn test_normalize_rounds_and_bounds_stored_values() {
        let raw = RawProduct {
            id: Some(Uuid::new_v4()),
            name: Some("Loose Tea".to_string()),
            selling_price: Some(dec("10.005")),
            tax_percentage: Some(dec("12.345")),
            ..Default::default()
        };
        let product = raw.clone().normalize(PriceBasis::Selling).unwrap();
        assert_eq!(product.unit_price, dec("10.01"));
        assert_eq!(product.tax_percentage, dec("12.35"));

        let oversized = RawProduct {
            selling_price: Some(dec("1000000000000")),
            ..raw.clone()
        };
        assert!(matches!(
            oversized.normalize(PriceBasis::Selling),
            Err(ResolutionError::Malformed { .. })
        ));
        let oversized = RawProduct {
            tax_percentage: Some(dec("10000")),
            ..raw
        };
        assert!(oversized.normalize(PriceBasis::Selling).is_err());
    }

    #[test]
    fn test_lenient_decimal_rejects_garbage() {
        let result: Result<RawProduct, _> = serde_json::from_value(serde_json::json!({
            "id": "3f2b8d4e-6c1a-4e0b-9b55-2f7c1d9a0e11",
            "selling_price": "ten"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_exact_code() {
        let index = sample_index();
        let found = index
            .resolve(&ProductQuery::Code("P100".to_string()))
            .unwrap();
        assert_eq!(found.name, "Paracetamol 500mg");

        // Prefix of another code must not match an exact lookup
        let found = index
            .resolve(&ProductQuery::Code(" P1001\n".to_string()))
            .unwrap();
        assert_eq!(found.name, "Pain Relief Gel");
    }

    #[test]
    fn test_resolve_unknown_code() {
        let index = sample_index();
        let err = index
            .resolve(&ProductQuery::Code("ZZZ".to_string()))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_duplicate_code_is_ambiguous() {
        let mut index = sample_index();
        index.insert(product("P100", "Paracetamol Duplicate", "99"));
        let err = index
            .resolve(&ProductQuery::Code("P100".to_string()))
            .unwrap_err();
        match err {
            ResolutionError::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_by_id() {
        let index = sample_index();
        let target = index.search("antacid", 1).remove(0);
        let found = index.resolve(&ProductQuery::Id(target.id)).unwrap();
        assert_eq!(found, target);
    }

    #[test]
    fn test_search_ranking() {
        let index = sample_index();
        let results = index.search("p100", 10);
        let codes: Vec<_> = results.iter().filter_map(|p| p.code.as_deref()).collect();
        assert_eq!(codes, vec!["P100", "P1001"]);

        let results = index.search("vit", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code.as_deref(), Some("C300"));

        // Substring of a name ranks after name prefixes
        let results = index.search("a", 10);
        assert_eq!(results[0].code.as_deref(), Some("A200"));
    }

    #[test]
    fn test_resolve_text_unique_best_match() {
        let index = sample_index();
        let found = index
            .resolve(&ProductQuery::Text("vitamin".to_string()))
            .unwrap();
        assert_eq!(found.code.as_deref(), Some("C300"));

        let err = index
            .resolve(&ProductQuery::Text("pa".to_string()))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Ambiguous { .. }));
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut index = sample_index();
        let mut updated = index.search("C300", 1).remove(0);
        updated.unit_price = dec("130");
        index.insert(updated.clone());
        assert_eq!(index.len(), 4);
        assert_eq!(
            index
                .resolve(&ProductQuery::Code("C300".to_string()))
                .unwrap()
                .unit_price,
            dec("130")
        );
    }

    #[test]
    fn test_insert_moves_changed_code() {
        let mut index = sample_index();
        let mut renamed = index.search("A200", 1).remove(0);
        renamed.code = Some("A201".to_string());
        index.insert(renamed.clone());

        assert_eq!(index.len(), 4);
        assert!(matches!(
            index.resolve(&ProductQuery::Code("A200".to_string())),
            Err(ResolutionError::NotFound { .. })
        ));
        assert_eq!(
            index.resolve(&ProductQuery::Code("A201".to_string())).unwrap(),
            renamed
        );
        assert_eq!(index.resolve(&ProductQuery::Id(renamed.id)).unwrap(), renamed);
    }

    #[test]
    fn test_large_catalog_builds_and_resolves() {
        let products: Vec<CatalogProduct> = (0..50_000)
            .map(|i| product(&format!("SKU{:05}", i), &format!("Item {}", i), "1"))
            .collect();
        let middle = products[25_000].clone();
        let index = CatalogIndex::new(products);

        assert_eq!(index.len(), 50_000);
        assert_eq!(
            index.resolve(&ProductQuery::Code("SKU49999".to_string())).unwrap().name,
            "Item 49999"
        );
        assert_eq!(index.resolve(&ProductQuery::Id(middle.id)).unwrap(), middle);
    }

    #[test]
    fn test_from_raw_skips_malformed() {
        let raw = vec![
            RawProduct {
                id: Some(Uuid::new_v4()),
                code: Some("X1".to_string()),
                name: Some("Good".to_string()),
                ..Default::default()
            },
            RawProduct::default(),
        ];
        let (index, rejected) = CatalogIndex::from_raw(raw, PriceBasis::Selling);
        assert_eq!(index.len(), 1);
        assert_eq!(rejected.len(), 1);
    }
}
