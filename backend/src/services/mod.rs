//! Business logic services for the Stockdesk server

pub mod catalog;
pub mod documents;
pub mod purchase_orders;

pub use catalog::CatalogService;
pub use documents::DocumentService;
pub use purchase_orders::PurchaseOrderService;
