//! WebAssembly bindings for the Stockdesk document engine
//!
//! The browser keeps one `DocumentEngine` per document screen. Every call
//! takes and returns JSON strings; failures are thrown as JS `Error`s whose
//! message is a JSON object `{ "code", "message", "detail" }`.
//!
//! The engine never talks to the network. `prepareSubmission` hands back
//! the method, path and body to send, and the caller reports the answer
//! through `completeSubmission` or `submissionFailed`.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use uuid::Uuid;
use wasm_bindgen::prelude::*;

use shared::{
    compute_line_with, recompute_summary, BuilderSnapshot, CatalogIndex, CatalogProduct,
    CatalogResolver, DocumentBuilder, DocumentHeader, DocumentKind, DocumentResponse,
    DocumentSummary, EngineError, EnginePolicy, ErrorResponse, LineEdit, LineItem, MergeOutcome,
    PreparedSubmission, ProductQuery, PurchaseOrderResponse, RawProduct,
    ResolutionError, SubmitDocumentRequest, SubmitResponse,
};

/// Default number of search candidates offered to the user
const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Failure of a binding call
#[derive(Error, Debug)]
pub enum BindingError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid {what}: {reason}")]
    Input { what: &'static str, reason: String },
}

impl BindingError {
    fn input(what: &'static str, reason: impl ToString) -> Self {
        BindingError::Input {
            what,
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BindingError::Engine(e) => e.code(),
            BindingError::Input { .. } => "INVALID_INPUT",
        }
    }

    /// JSON error body handed to JavaScript
    pub fn to_json(&self) -> String {
        let detail = match self {
            BindingError::Engine(e) => serde_json::to_value(e).unwrap_or_default(),
            BindingError::Input { .. } => serde_json::Value::Null,
        };
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "detail": detail,
        })
        .to_string()
    }
}

type BindingResult<T> = Result<T, BindingError>;

fn parse<T: DeserializeOwned>(what: &'static str, json: &str) -> BindingResult<T> {
    serde_json::from_str(json).map_err(|e| BindingError::input(what, e))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> BindingResult<String> {
    serde_json::to_string(value).map_err(|e| BindingError::input("output", e))
}

fn parse_kind(kind: &str) -> BindingResult<DocumentKind> {
    DocumentKind::from_str(kind)
        .or_else(|| DocumentKind::from_path_segment(kind))
        .ok_or_else(|| BindingError::input("document kind", kind))
}

fn parse_id(id: &str) -> BindingResult<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|e| BindingError::input("id", e))
}

/// Log to the browser console and convert into a thrown `Error`
fn throw(err: BindingError) -> JsValue {
    let body = err.to_json();
    web_sys::console::error_1(&JsValue::from_str(&body));
    js_sys::Error::new(&body).into()
}

#[derive(Serialize)]
struct CatalogLoad {
    loaded: usize,
    rejected: Vec<ResolutionError>,
}

#[derive(Serialize)]
struct ScanResult<'a> {
    outcome: MergeOutcome,
    document: BuilderSnapshot<'a>,
}

#[derive(Serialize)]
struct OutgoingSubmission<'a> {
    method: &'static str,
    path: String,
    body: &'a SubmitDocumentRequest,
}

impl<'a> From<&'a PreparedSubmission> for OutgoingSubmission<'a> {
    fn from(prepared: &'a PreparedSubmission) -> Self {
        Self {
            method: prepared.method(),
            path: prepared.path(),
            body: &prepared.request,
        }
    }
}

/// One in-progress document plus the catalog it resolves against
#[wasm_bindgen]
pub struct DocumentEngine {
    builder: DocumentBuilder,
    catalog: CatalogIndex,
}

#[wasm_bindgen]
impl DocumentEngine {
    /// `kind` is `billing`, `purchase_order`, `inward_receipt` or `return`
    /// (URL segments are accepted too); `policy_json` may be empty
    #[wasm_bindgen(constructor)]
    pub fn new(kind: &str, policy_json: &str) -> Result<DocumentEngine, JsValue> {
        Self::create(kind, policy_json).map_err(throw)
    }

    /// Replace the local catalog; returns `{ loaded, rejected }`
    #[wasm_bindgen(js_name = loadCatalog)]
    pub fn load_catalog(&mut self, products_json: &str) -> Result<String, JsValue> {
        self.try_load_catalog(products_json).map_err(throw)
    }

    /// Scanner or Enter-key path: exact code match, then merge
    #[wasm_bindgen(js_name = scanCode)]
    pub fn scan_code(&mut self, code: &str) -> Result<String, JsValue> {
        self.try_scan(ProductQuery::Code(code.to_string())).map_err(throw)
    }

    /// Typed text resolved to a single product
    #[wasm_bindgen(js_name = scanText)]
    pub fn scan_text(&mut self, text: &str) -> Result<String, JsValue> {
        self.try_scan(ProductQuery::Text(text.to_string())).map_err(throw)
    }

    /// A product picked from the search candidates
    #[wasm_bindgen(js_name = addProductById)]
    pub fn add_product_by_id(&mut self, product_id: &str) -> Result<String, JsValue> {
        parse_id(product_id)
            .and_then(|id| self.try_scan(ProductQuery::Id(id)))
            .map_err(throw)
    }

    /// A product fetched by the caller from the catalog service
    #[wasm_bindgen(js_name = addProduct)]
    pub fn add_product(&mut self, product_json: &str) -> Result<String, JsValue> {
        self.try_add_product(product_json).map_err(throw)
    }

    pub fn search(&self, text: &str, limit: Option<usize>) -> Result<String, JsValue> {
        self.try_search(text, limit).map_err(throw)
    }

    /// `edit_json` is `{ "field": "quantity", "value": "3" }`
    #[wasm_bindgen(js_name = editLine)]
    pub fn edit_line(&mut self, index: usize, edit_json: &str) -> Result<String, JsValue> {
        self.try_edit_line(index, edit_json).map_err(throw)
    }

    #[wasm_bindgen(js_name = removeLine)]
    pub fn remove_line(&mut self, index: usize) -> Result<String, JsValue> {
        self.try_remove_line(index).map_err(throw)
    }

    #[wasm_bindgen(js_name = setHeader)]
    pub fn set_header(&mut self, header_json: &str) -> Result<String, JsValue> {
        self.try_set_header(header_json).map_err(throw)
    }

    #[wasm_bindgen(js_name = loadSourceOrder)]
    pub fn load_source_order(&mut self, order_json: &str) -> Result<String, JsValue> {
        self.try_load_source_order(order_json).map_err(throw)
    }

    /// Run validation; errors end up in the snapshot
    pub fn validate(&mut self) -> Result<String, JsValue> {
        self.try_validate().map_err(throw)
    }

    /// `{ method, path, body }` for the caller to send
    #[wasm_bindgen(js_name = prepareSubmission)]
    pub fn prepare_submission(&mut self) -> Result<String, JsValue> {
        self.try_prepare_submission().map_err(throw)
    }

    /// The submit succeeded with this response body
    #[wasm_bindgen(js_name = completeSubmission)]
    pub fn complete_submission(&mut self, response_json: &str) -> Result<String, JsValue> {
        self.try_complete_submission(response_json).map_err(throw)
    }

    /// The submit failed with this status and body; `status` 0 means no response
    #[wasm_bindgen(js_name = submissionFailed)]
    pub fn submission_failed(&mut self, status: u16, body: &str) -> Result<String, JsValue> {
        self.try_submission_failed(status, body).map_err(throw)
    }

    /// The prepared payload was never sent
    #[wasm_bindgen(js_name = abortSubmission)]
    pub fn abort_submission(&mut self) -> Result<String, JsValue> {
        self.builder.abort_submission();
        self.try_snapshot().map_err(throw)
    }

    #[wasm_bindgen(js_name = beginEdit)]
    pub fn begin_edit(&mut self, document_id: &str) -> Result<String, JsValue> {
        self.try_begin_edit(document_id).map_err(throw)
    }

    /// `order_json` is the live source order of an inward receipt, if any
    #[wasm_bindgen(js_name = finishEdit)]
    pub fn finish_edit(
        &mut self,
        document_json: &str,
        order_json: Option<String>,
    ) -> Result<String, JsValue> {
        self.try_finish_edit(document_json, order_json.as_deref())
            .map_err(throw)
    }

    pub fn reset(&mut self) -> Result<String, JsValue> {
        self.builder.reset();
        self.try_snapshot().map_err(throw)
    }

    pub fn snapshot(&self) -> Result<String, JsValue> {
        self.try_snapshot().map_err(throw)
    }
}

impl DocumentEngine {
    pub fn create(kind: &str, policy_json: &str) -> BindingResult<Self> {
        let kind = parse_kind(kind)?;
        let policy = if policy_json.trim().is_empty() {
            EnginePolicy::default()
        } else {
            parse("policy", policy_json)?
        };
        Ok(Self {
            builder: DocumentBuilder::new(kind, policy),
            catalog: CatalogIndex::default(),
        })
    }

    /// Records are normalized with the price basis of this document kind
    pub fn try_load_catalog(&mut self, products_json: &str) -> BindingResult<String> {
        let raw: Vec<RawProduct> = parse("catalog", products_json)?;
        let (catalog, rejected) = CatalogIndex::from_raw(raw, self.builder.kind().price_basis());
        self.catalog = catalog;
        to_json(&CatalogLoad {
            loaded: self.catalog.len(),
            rejected,
        })
    }

    pub fn try_scan(&mut self, query: ProductQuery) -> BindingResult<String> {
        let outcome = self.builder.scan(&self.catalog, &query)?;
        to_json(&ScanResult {
            outcome,
            document: self.builder.snapshot(),
        })
    }

    /// Accepts a canonical product or any raw catalog record
    pub fn try_add_product(&mut self, product_json: &str) -> BindingResult<String> {
        let product = match serde_json::from_str::<CatalogProduct>(product_json) {
            Ok(product) => product,
            Err(_) => parse::<RawProduct>("product", product_json)?
                .normalize(self.builder.kind().price_basis())
                .map_err(EngineError::from)?,
        };
        let outcome = self.builder.add_product(&product)?;
        to_json(&ScanResult {
            outcome,
            document: self.builder.snapshot(),
        })
    }

    pub fn try_search(&self, text: &str, limit: Option<usize>) -> BindingResult<String> {
        let candidates = self
            .catalog
            .search(text, limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
        to_json(&candidates)
    }

    pub fn try_edit_line(&mut self, index: usize, edit_json: &str) -> BindingResult<String> {
        let edit: LineEdit = parse("line edit", edit_json)?;
        self.builder.edit_line(index, edit)?;
        self.try_snapshot()
    }

    pub fn try_remove_line(&mut self, index: usize) -> BindingResult<String> {
        self.builder.remove_line(index)?;
        self.try_snapshot()
    }

    pub fn try_set_header(&mut self, header_json: &str) -> BindingResult<String> {
        let header: DocumentHeader = parse("header", header_json)?;
        self.builder.set_header(header)?;
        self.try_snapshot()
    }

    pub fn try_load_source_order(&mut self, order_json: &str) -> BindingResult<String> {
        let order: PurchaseOrderResponse = parse("purchase order", order_json)?;
        self.builder.load_source_order(&order)?;
        self.try_snapshot()
    }

    pub fn try_validate(&mut self) -> BindingResult<String> {
        // Failures are reported through the snapshot's errors
        let _ = self.builder.validate();
        self.try_snapshot()
    }

    pub fn try_prepare_submission(&mut self) -> BindingResult<String> {
        let prepared = self.builder.prepare_submission()?;
        to_json(&OutgoingSubmission::from(&prepared))
    }

    pub fn try_complete_submission(&mut self, response_json: &str) -> BindingResult<String> {
        let outcome = match parse::<SubmitResponse>("submit response", response_json) {
            Ok(response) => Ok(response),
            Err(e) => {
                // Unreadable success body: the builder must still leave Validating
                self.builder.abort_submission();
                return Err(e);
            }
        };
        let response = self.builder.complete_submission(outcome)?;
        to_json(&response)
    }

    /// Feeds the server's error back; returns the resulting snapshot
    pub fn try_submission_failed(&mut self, status: u16, body: &str) -> BindingResult<String> {
        let err = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(parsed) => parsed.into_engine_error(status),
            Err(_) if status == 0 => EngineError::Persistence("no response from server".to_string()),
            Err(_) => EngineError::Persistence(format!("server answered HTTP {}", status)),
        };
        // The error is recorded on the builder; the snapshot carries it
        let _ = self.builder.complete_submission(Err(err));
        self.try_snapshot()
    }

    pub fn try_begin_edit(&mut self, document_id: &str) -> BindingResult<String> {
        self.builder.begin_edit(parse_id(document_id)?)?;
        self.try_snapshot()
    }

    pub fn try_finish_edit(
        &mut self,
        document_json: &str,
        order_json: Option<&str>,
    ) -> BindingResult<String> {
        let document: DocumentResponse = parse("document", document_json)?;
        let order = order_json
            .filter(|json| !json.trim().is_empty())
            .map(|json| parse::<PurchaseOrderResponse>("purchase order", json))
            .transpose()?;
        self.builder.finish_edit(document, order.as_ref())?;
        self.try_snapshot()
    }

    pub fn try_snapshot(&self) -> BindingResult<String> {
        to_json(&self.builder.snapshot())
    }

    pub fn builder(&self) -> &DocumentBuilder {
        &self.builder
    }
}

/// Recompute one line's tax and total under the given policy JSON
#[wasm_bindgen(js_name = computeLine)]
pub fn compute_line(line_json: &str, policy_json: &str) -> Result<String, JsValue> {
    try_compute_line(line_json, policy_json).map_err(throw)
}

/// Summary of the given lines
#[wasm_bindgen(js_name = summarizeLines)]
pub fn summarize_lines(lines_json: &str) -> Result<String, JsValue> {
    try_summarize_lines(lines_json).map_err(throw)
}

/// Price basis a document kind snapshots from the catalog
#[wasm_bindgen(js_name = priceBasis)]
pub fn price_basis(kind: &str) -> Result<String, JsValue> {
    parse_kind(kind)
        .map(|kind| kind.price_basis().as_str().to_string())
        .map_err(throw)
}

pub fn try_compute_line(line_json: &str, policy_json: &str) -> BindingResult<String> {
    let line: LineItem = parse("line", line_json)?;
    let policy: EnginePolicy = if policy_json.trim().is_empty() {
        EnginePolicy::default()
    } else {
        parse("policy", policy_json)?
    };
    to_json(&compute_line_with(line, policy.negative_totals))
}

pub fn try_summarize_lines(lines_json: &str) -> BindingResult<String> {
    let lines: Vec<LineItem> = parse("lines", lines_json)?;
    let summary: DocumentSummary = recompute_summary(&lines);
    to_json(&summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    fn amount(value: &Value) -> Decimal {
        match value {
            Value::String(s) => dec(s),
            other => dec(&other.to_string()),
        }
    }

    const CATALOG: &str = r#"[
        {"id":"5b0e4c3e-8f4b-4f0e-9d5e-0a8f2d6f1a01","code":"SUGAR-1","name":"Sugar 1kg",
         "selling_price":"55","purchase_price":"48","tax_percentage":"5"},
        {"id":"5b0e4c3e-8f4b-4f0e-9d5e-0a8f2d6f1a02","code":"TEA-250","name":"Tea 250g",
         "selling_price":"120.50","purchase_price":"100","tax_percentage":"12"},
        {"name":"no id"}
    ]"#;

    fn engine(kind: &str) -> DocumentEngine {
        let mut engine = DocumentEngine::create(kind, "").unwrap();
        engine.try_load_catalog(CATALOG).unwrap();
        engine
    }

    #[test]
    fn test_catalog_load_reports_rejected_records() {
        let mut engine = DocumentEngine::create("billing", "").unwrap();
        let loaded = json(&engine.try_load_catalog(CATALOG).unwrap());
        assert_eq!(loaded["loaded"], 2);
        assert_eq!(loaded["rejected"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_repeated_scan_merges() {
        let mut engine = engine("billing");
        engine.try_scan(ProductQuery::Code("SUGAR-1".into())).unwrap();
        let result = json(&engine.try_scan(ProductQuery::Code("SUGAR-1".into())).unwrap());

        assert_eq!(result["outcome"]["merged"], true);
        let lines = result["document"]["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(amount(&lines[0]["quantity"]), dec("2"));
        assert_eq!(amount(&lines[0]["total_price"]), dec("115.50"));
    }

    #[test]
    fn test_unknown_code_leaves_document_unchanged() {
        let mut engine = engine("billing");
        let err = engine
            .try_scan(ProductQuery::Code("NOPE".into()))
            .unwrap_err();
        assert_eq!(err.code(), "PRODUCT_NOT_FOUND");
        assert!(engine.builder().lines().is_empty());

        let body = json(&err.to_json());
        assert_eq!(body["code"], "PRODUCT_NOT_FOUND");
    }

    #[test]
    fn test_purchase_kinds_use_purchase_price() {
        let mut engine = engine("purchase-order");
        engine.try_scan(ProductQuery::Code("TEA-250".into())).unwrap();
        assert_eq!(engine.builder().lines()[0].unit_price, dec("100"));
    }

    #[test]
    fn test_edit_line_sets_quantity() {
        let mut engine = engine("billing");
        engine.try_scan(ProductQuery::Code("TEA-250".into())).unwrap();
        engine
            .try_edit_line(0, r#"{"field":"quantity","value":"3"}"#)
            .unwrap();

        let line = &engine.builder().lines()[0];
        assert_eq!(line.quantity, dec("3"));
        assert_eq!(line.tax_amount, dec("43.38"));
        assert_eq!(line.total_price, dec("404.88"));
    }

    #[test]
    fn test_oversized_input_is_an_error_not_a_panic() {
        let mut engine = engine("billing");
        engine.try_scan(ProductQuery::Code("TEA-250".into())).unwrap();
        let err = engine
            .try_edit_line(0, r#"{"field":"quantity","value":"100000000000000000000"}"#)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(engine.builder().lines()[0].quantity, dec("1"));

        let line = r#"{"product_id":null,"product_name":"X",
                       "quantity":"100000000000000000000","unit_price":"100000000000000000000"}"#;
        let computed = json(&try_compute_line(line, "").unwrap());
        assert_eq!(amount(&computed["total_price"]), Decimal::ZERO);
        assert!(try_summarize_lines(&format!("[{}]", computed)).is_ok());
    }

    #[test]
    fn test_submission_round_trip() {
        let mut engine = engine("billing");
        engine.try_scan(ProductQuery::Code("SUGAR-1".into())).unwrap();

        let err = engine.try_prepare_submission().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        engine
            .try_set_header(r#"{"counterparty_name":"Corner Store","document_date":"2026-01-05"}"#)
            .unwrap();
        let outgoing = json(&engine.try_prepare_submission().unwrap());
        assert_eq!(outgoing["method"], "POST");
        assert_eq!(outgoing["path"], "/documents/billing");
        assert_eq!(outgoing["body"]["items"].as_array().map(Vec::len), Some(1));

        let response = r#"{"id":"0d7c0a4e-3c1b-4d7e-8a53-1f4e2b9c6d10","success":true,
                           "document_number":"BIL-000001"}"#;
        engine.try_complete_submission(response).unwrap();
        let snapshot = json(&engine.try_snapshot().unwrap());
        assert_eq!(snapshot["state"], "submitted");
        assert_eq!(snapshot["lines"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_conflict_keeps_lines_and_flags_reload() {
        let order = r#"{"id":"7f1f5a0c-2b7e-4d55-9c3a-55d1c0f7b001","header":{"counterparty_name":"Mill Co"},
            "items":[{"line_id":"7f1f5a0c-2b7e-4d55-9c3a-55d1c0f7b002",
                      "product_id":"5b0e4c3e-8f4b-4f0e-9d5e-0a8f2d6f1a01","product_code":"SUGAR-1",
                      "product_name":"Sugar 1kg","ordered_quantity":"100","pending_quantity":"40",
                      "unit_price":"48","tax_percentage":"5"}]}"#;
        let mut engine = engine("inward_receipt");
        engine.try_load_source_order(order).unwrap();
        engine
            .try_set_header(r#"{"counterparty_name":"Mill Co","document_date":"2026-01-05"}"#)
            .unwrap();
        assert_eq!(engine.builder().lines()[0].quantity, dec("40"));

        engine.try_prepare_submission().unwrap();
        let body = r#"{"error":{"code":"EXCEEDS_PENDING","message":"Pending quantity is 20"}}"#;
        let snapshot = json(&engine.try_submission_failed(409, body).unwrap());

        assert_eq!(snapshot["needs_source_reload"], true);
        assert_eq!(snapshot["state"], "building");
        assert_eq!(snapshot["lines"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_network_failure_is_retryable() {
        let mut engine = engine("billing");
        engine.try_scan(ProductQuery::Code("SUGAR-1".into())).unwrap();
        engine
            .try_set_header(r#"{"counterparty_name":"Corner Store","document_date":"2026-01-05"}"#)
            .unwrap();
        let first = engine.try_prepare_submission().unwrap();

        engine.try_submission_failed(0, "").unwrap();
        assert_eq!(engine.try_prepare_submission().unwrap(), first);
    }

    #[test]
    fn test_invalid_kind_and_input() {
        assert!(DocumentEngine::create("invoice", "").is_err());
        let mut engine = engine("billing");
        let err = engine.try_edit_line(0, "not json").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_compute_line_and_summary() {
        let line = r#"{"product_id":null,"product_code":"X","product_name":"X",
                       "quantity":"2","unit_price":"10","discount_amount":"25"}"#;
        let clamped = json(&try_compute_line(line, r#"{"negative_totals":"clamp_to_zero"}"#).unwrap());
        assert_eq!(amount(&clamped["total_price"]), Decimal::ZERO);

        let computed = try_compute_line(line, "").unwrap();
        let summary = json(&try_summarize_lines(&format!("[{}]", computed)).unwrap());
        assert_eq!(amount(&summary["grand_total"]), dec("-5"));
        assert_eq!(summary["line_count"], 1);
    }
}
