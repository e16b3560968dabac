//! Document builder: the in-progress document and its lifecycle
//!
//! One `DocumentBuilder` per document screen. It owns the lines, the header,
//! the derived summary and (for inward receipts) the source order tracker.
//! I/O stays outside: the caller sends `prepare_submission`'s payload and
//! hands the outcome back through `complete_submission`.
//!
//! ```text
//! Empty -> Building -> Validating -> Submitted
//!              ^           |
//!              |           +-> ValidationFailed
//!              +--------------- (server rejected / conflict)
//! Loading -> Building            (edit of an existing document)
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    aggregate_requests, CatalogProduct, CatalogResolver, Document, DocumentHeader,
    DocumentSummary, EnginePolicy, FulfillmentState, FulfillmentTracker, LineEdit, LineItem,
    MergeOutcome, ProductQuery,
};
use crate::contracts::{
    DocumentResponse, PersistedItem, PreparedSubmission, PurchaseOrderResponse,
    SubmitDocumentRequest, SubmitItem, SubmitResponse,
};
use crate::error::{EngineError, FieldError, ValidationErrors};
use crate::types::DocumentKind;
use crate::validation::validate_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderState {
    Empty,
    /// Waiting for an existing document to be fetched
    Loading,
    Building,
    /// A submission is in flight
    Validating,
    Submitted,
    ValidationFailed,
}

impl BuilderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuilderState::Empty => "empty",
            BuilderState::Loading => "loading",
            BuilderState::Building => "building",
            BuilderState::Validating => "validating",
            BuilderState::Submitted => "submitted",
            BuilderState::ValidationFailed => "validation_failed",
        }
    }
}

impl std::fmt::Display for BuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serializable view of a builder, for UI bindings
#[derive(Debug, Serialize)]
pub struct BuilderSnapshot<'a> {
    pub kind: DocumentKind,
    pub state: BuilderState,
    pub editing: Option<Uuid>,
    pub header: &'a DocumentHeader,
    pub lines: &'a [LineItem],
    pub summary: &'a DocumentSummary,
    pub errors: &'a [FieldError],
    pub needs_source_reload: bool,
    pub source_order: Option<&'a FulfillmentTracker>,
    pub source_state: Option<FulfillmentState>,
}

#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    policy: EnginePolicy,
    document: Document,
    state: BuilderState,
    /// Id of the persisted document being edited
    editing: Option<Uuid>,
    tracker: Option<FulfillmentTracker>,
    needs_source_reload: bool,
    errors: Vec<FieldError>,
    last_submitted: Option<SubmitResponse>,
    /// Source order id and per-line quantities the edited document already received
    edit_credits: Option<(Uuid, Vec<(Uuid, Decimal)>)>,
}

impl DocumentBuilder {
    pub fn new(kind: DocumentKind, policy: EnginePolicy) -> Self {
        Self {
            policy,
            document: Document::new(kind),
            state: BuilderState::Empty,
            editing: None,
            tracker: None,
            needs_source_reload: false,
            errors: Vec::new(),
            last_submitted: None,
            edit_credits: None,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.document.kind()
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn header(&self) -> &DocumentHeader {
        self.document.header()
    }

    pub fn lines(&self) -> &[LineItem] {
        self.document.lines()
    }

    pub fn summary(&self) -> &DocumentSummary {
        self.document.summary()
    }

    /// Errors from the last validation or rejected submit
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn tracker(&self) -> Option<&FulfillmentTracker> {
        self.tracker.as_ref()
    }

    pub fn editing(&self) -> Option<Uuid> {
        self.editing
    }

    /// Set after a pending-quantity conflict until the order is reloaded
    pub fn needs_source_reload(&self) -> bool {
        self.needs_source_reload
    }

    pub fn last_submitted(&self) -> Option<&SubmitResponse> {
        self.last_submitted.as_ref()
    }

    pub fn snapshot(&self) -> BuilderSnapshot<'_> {
        BuilderSnapshot {
            kind: self.kind(),
            state: self.state,
            editing: self.editing,
            header: self.document.header(),
            lines: self.document.lines(),
            summary: self.document.summary(),
            errors: &self.errors,
            needs_source_reload: self.needs_source_reload,
            source_order: self.tracker.as_ref(),
            source_state: self.tracker.as_ref().map(FulfillmentTracker::state),
        }
    }

    // ------------------------------------------------------------------
    // Line operations
    // ------------------------------------------------------------------

    /// Merge path for a resolved product
    pub fn add_product(&mut self, product: &CatalogProduct) -> Result<MergeOutcome, EngineError> {
        self.ensure_mutable("add a product")?;
        let outcome = self
            .document
            .add_product(product, self.policy.negative_totals)?;
        if !outcome.merged {
            self.attach_source_line(outcome.index)?;
        }
        self.touch();
        Ok(outcome)
    }

    /// Resolve a scanned code or typed text and merge it in
    ///
    /// A failed resolution leaves the document as it was.
    pub fn scan<R>(&mut self, resolver: &R, query: &ProductQuery) -> Result<MergeOutcome, EngineError>
    where
        R: CatalogResolver + ?Sized,
    {
        self.ensure_mutable("scan a product")?;
        let product = resolver.resolve(query).map_err(|e| {
            tracing::debug!(query = %query.describe(), "scan not resolved: {}", e);
            EngineError::from(e)
        })?;
        self.add_product(&product)
    }

    /// Manual edit path: sets the field, never merges
    pub fn edit_line(&mut self, index: usize, edit: LineEdit) -> Result<&LineItem, EngineError> {
        self.ensure_mutable("edit a line")?;
        self.document
            .edit_line(index, edit, self.policy.negative_totals)?;
        self.touch();
        Ok(&self.document.lines()[index])
    }

    pub fn remove_line(&mut self, index: usize) -> Result<LineItem, EngineError> {
        self.ensure_mutable("remove a line")?;
        let removed = self.document.remove_line(index)?;
        self.touch();
        Ok(removed)
    }

    /// Replace the header; a loaded source order stays referenced
    pub fn set_header(&mut self, mut header: DocumentHeader) -> Result<(), EngineError> {
        self.ensure_mutable("change the header")?;
        if let Some(tracker) = &self.tracker {
            header.source_order_id = Some(tracker.order_id());
        }
        self.document.set_header(header);
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Source purchase order
    // ------------------------------------------------------------------

    /// Install a purchase order to receive against
    ///
    /// A different order replaces the lines of the previous one and
    /// pre-populates one line per pending order line at its pending
    /// quantity. Reloading the order already referenced only refreshes the
    /// pending quantities. Returns the number of lines added.
    pub fn load_source_order(&mut self, order: &PurchaseOrderResponse) -> Result<usize, EngineError> {
        if !self.kind().tracks_fulfillment() {
            return Err(EngineError::Validation(ValidationErrors::single(
                FieldError::header(
                    "source_order_id",
                    format!("{} documents cannot reference a purchase order", self.kind()),
                ),
            )));
        }
        self.ensure_mutable("load a purchase order")?;

        let mut tracker = FulfillmentTracker::from_order(order);
        if let Some((order_id, credits)) = &self.edit_credits {
            if *order_id == order.id {
                for (line_id, quantity) in credits {
                    // Lines dropped from the order since the receipt was saved
                    if let Err(e) = tracker.release(*line_id, *quantity) {
                        tracing::debug!(order_id = %order.id, "edit credit skipped: {}", e);
                    }
                }
            }
        }

        let same_order = self.document.header().source_order_id == Some(order.id);
        let policy = self.policy.negative_totals;
        let mut added = 0;

        if same_order {
            for index in 0..self.document.lines().len() {
                let Some(line_id) = self.document.lines()[index].source_line_id else {
                    continue;
                };
                let pending = tracker.pending_for(line_id);
                self.document.update_line(index, policy, |line| {
                    line.pending_quantity_at_source = pending;
                })?;
            }
        } else {
            self.document.retain_lines(|l| l.source_line_id.is_none());
            for source in tracker.lines() {
                if source.state() == FulfillmentState::Fulfilled {
                    continue;
                }
                let key = source.line_key();
                let manual = self
                    .document
                    .lines()
                    .iter()
                    .position(|l| l.source_line_id.is_none() && l.key().as_ref() == Some(&key));
                match manual {
                    Some(index) => {
                        self.document.update_line(index, policy, |line| {
                            line.source_line_id = Some(source.line_id);
                            line.pending_quantity_at_source = Some(source.pending_quantity);
                        })?;
                    }
                    None => {
                        self.document.push_line(source.to_line_item(), policy);
                        added += 1;
                    }
                }
            }
        }

        let mut header = self.document.header().clone();
        header.source_order_id = Some(order.id);
        if !header.has_counterparty() {
            header.counterparty_id = order.header.counterparty_id;
            header.counterparty_name = order.header.counterparty_name.clone();
        }
        self.document.set_header(header);

        tracing::debug!(
            order_id = %order.id,
            refreshed = same_order,
            added,
            state = tracker.state().as_str(),
            "purchase order loaded"
        );
        self.tracker = Some(tracker);
        self.needs_source_reload = false;
        self.touch();
        Ok(added)
    }

    /// Link a freshly appended inward line to an unreferenced open order line
    /// of the same product
    fn attach_source_line(&mut self, index: usize) -> Result<(), EngineError> {
        let Some(tracker) = &self.tracker else {
            return Ok(());
        };
        let lines = self.document.lines();
        let Some(key) = lines.get(index).and_then(LineItem::key) else {
            return Ok(());
        };
        let source = tracker.lines().iter().find(|s| {
            s.line_key() == key
                && s.state() != FulfillmentState::Fulfilled
                && !lines.iter().any(|l| l.source_line_id == Some(s.line_id))
        });
        if let Some(source) = source {
            let (line_id, pending) = (source.line_id, source.pending_quantity);
            self.document
                .update_line(index, self.policy.negative_totals, |line| {
                    line.source_line_id = Some(line_id);
                    line.pending_quantity_at_source = Some(pending);
                })?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation and submission
    // ------------------------------------------------------------------

    /// Check the document without submitting it
    pub fn validate(&mut self) -> Result<(), ValidationErrors> {
        let result = validate_document(
            self.kind(),
            self.document.header(),
            self.document.lines(),
            self.tracker.as_ref(),
            &self.policy,
        );
        match &result {
            Ok(()) => self.errors.clear(),
            Err(errors) => {
                self.errors = errors.0.clone();
                if !matches!(self.state, BuilderState::Loading | BuilderState::Validating) {
                    self.state = BuilderState::ValidationFailed;
                }
            }
        }
        result
    }

    /// Validate and build the payload to send; the builder waits in
    /// `Validating` until `complete_submission` or `abort_submission`
    pub fn prepare_submission(&mut self) -> Result<PreparedSubmission, EngineError> {
        if matches!(self.state, BuilderState::Loading | BuilderState::Validating) {
            return Err(EngineError::invalid_state("submit", self.state));
        }

        self.state = BuilderState::Validating;
        let result = validate_document(
            self.kind(),
            self.document.header(),
            self.document.lines(),
            self.tracker.as_ref(),
            &self.policy,
        );
        if let Err(errors) = result {
            tracing::debug!(errors = errors.0.len(), "submission blocked by validation");
            self.errors = errors.0.clone();
            self.state = BuilderState::ValidationFailed;
            return Err(EngineError::Validation(errors));
        }
        self.errors.clear();

        let items = self
            .document
            .lines()
            .iter()
            .filter_map(SubmitItem::from_line)
            .collect();
        Ok(PreparedSubmission {
            kind: self.kind(),
            document_id: self.editing,
            request: SubmitDocumentRequest {
                header: self.document.header().clone(),
                items,
            },
        })
    }

    /// Record what the server answered to the prepared submission
    ///
    /// On success the builder starts over. On any failure header and lines
    /// are untouched, so resending the same payload is safe.
    pub fn complete_submission(
        &mut self,
        outcome: Result<SubmitResponse, EngineError>,
    ) -> Result<SubmitResponse, EngineError> {
        if self.state != BuilderState::Validating {
            return Err(EngineError::invalid_state("complete a submission", self.state));
        }

        match outcome {
            Ok(response) if response.success => {
                tracing::info!(
                    kind = %self.kind(),
                    id = %response.id,
                    number = response.document_number.as_deref().unwrap_or("-"),
                    "document submitted"
                );
                self.reset();
                self.state = BuilderState::Submitted;
                self.last_submitted = Some(response.clone());
                Ok(response)
            }
            Ok(response) => {
                self.state = BuilderState::Building;
                Err(EngineError::Persistence(format!(
                    "document {} was not saved",
                    response.id
                )))
            }
            Err(err) => {
                tracing::warn!(kind = %self.kind(), code = err.code(), "submission failed: {}", err);
                match &err {
                    EngineError::Conflict(_) => self.needs_source_reload = true,
                    EngineError::Validation(errors) => self.errors = errors.0.clone(),
                    _ => {}
                }
                self.state = BuilderState::Building;
                Err(err)
            }
        }
    }

    /// The prepared payload was never sent
    pub fn abort_submission(&mut self) {
        if self.state == BuilderState::Validating {
            self.state = BuilderState::Building;
        }
    }

    // ------------------------------------------------------------------
    // Editing persisted documents
    // ------------------------------------------------------------------

    /// Start editing a stored document; its data comes in via `finish_edit`
    pub fn begin_edit(&mut self, document_id: Uuid) -> Result<(), EngineError> {
        if matches!(self.state, BuilderState::Loading | BuilderState::Validating) {
            return Err(EngineError::invalid_state("edit a document", self.state));
        }
        self.reset();
        self.editing = Some(document_id);
        self.state = BuilderState::Loading;
        Ok(())
    }

    /// Rehydrate from the fetched document
    ///
    /// Stored tax and totals are ignored; every line is recomputed. For an
    /// inward receipt the live purchase order re-synchronizes pending
    /// quantities, crediting back what this document itself already received.
    pub fn finish_edit(
        &mut self,
        response: DocumentResponse,
        source_order: Option<&PurchaseOrderResponse>,
    ) -> Result<(), EngineError> {
        if self.state != BuilderState::Loading {
            return Err(EngineError::invalid_state("finish loading", self.state));
        }
        if response.kind != self.kind() {
            return Err(EngineError::Persistence(format!(
                "document {} is a {}, not a {}",
                response.id,
                response.kind,
                self.kind()
            )));
        }
        if self.editing != Some(response.id) {
            return Err(EngineError::Persistence(format!(
                "received document {} while loading another one",
                response.id
            )));
        }
        if let Some(order) = source_order {
            if response.header.source_order_id != Some(order.id) {
                return Err(EngineError::Validation(ValidationErrors::single(
                    FieldError::header("source_order_id", "does not match the document's purchase order"),
                )));
            }
        }

        let lines: Vec<LineItem> = response
            .items
            .into_iter()
            .map(PersistedItem::into_line_item)
            .collect();
        self.edit_credits = response.header.source_order_id.map(|order_id| {
            let received: Vec<(Uuid, Decimal)> = lines
                .iter()
                .filter_map(|l| l.source_line_id.map(|id| (id, l.quantity)))
                .collect();
            (order_id, aggregate_requests(&received))
        });
        self.document = Document::from_lines(
            self.kind(),
            response.header,
            lines,
            self.policy.negative_totals,
        );
        self.state = BuilderState::Building;

        if let Some(order) = source_order {
            self.load_source_order(order)?;
        }
        tracing::debug!(
            id = %response.id,
            lines = self.document.lines().len(),
            "document loaded for editing"
        );
        Ok(())
    }

    /// Drop everything and start a new, empty document of the same kind
    pub fn reset(&mut self) {
        self.document = Document::new(self.kind());
        self.state = BuilderState::Empty;
        self.editing = None;
        self.tracker = None;
        self.needs_source_reload = false;
        self.errors.clear();
        self.last_submitted = None;
        self.edit_credits = None;
    }

    fn ensure_mutable(&self, operation: &str) -> Result<(), EngineError> {
        match self.state {
            BuilderState::Loading | BuilderState::Validating => {
                Err(EngineError::invalid_state(operation, self.state))
            }
            _ => Ok(()),
        }
    }

    fn touch(&mut self) {
        self.state = BuilderState::Building;
    }
}
