//! Domain models of the line-item document engine

mod catalog;
mod document;
mod fulfillment;
mod lifecycle;
mod line_item;
mod policy;

pub use catalog::*;
pub use document::*;
pub use fulfillment::*;
pub use lifecycle::*;
pub use line_item::*;
pub use policy::*;
