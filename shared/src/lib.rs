//! Shared types and engine for the Stockdesk back office
//!
//! This crate holds the line-item document engine used by the browser
//! (via WASM) and re-validated by the backend: catalog normalization,
//! line computation, merge and accumulation, document summaries,
//! purchase-order fulfillment tracking and the document builder.
//! Nothing in here performs I/O.

pub mod contracts;
pub mod error;
pub mod models;
pub mod types;
pub mod validation;

pub use contracts::*;
pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
