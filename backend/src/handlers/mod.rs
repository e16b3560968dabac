//! HTTP handlers

pub mod catalog;
pub mod documents;
pub mod health;
pub mod purchase_orders;

pub use catalog::*;
pub use documents::*;
pub use health::*;
pub use purchase_orders::*;
