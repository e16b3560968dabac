//! Configurable business policies
//!
//! Whether negative line totals and client-side over-receipt are allowed is
//! a product decision, so both are explicit settings instead of hard-coded
//! behavior.

use serde::{Deserialize, Serialize};

/// What to do with a line whose discount exceeds price plus tax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeTotalPolicy {
    /// Keep the negative total as computed
    #[default]
    Allow,
    /// Floor the line total at zero
    ClampToZero,
    /// Keep the computed total but fail validation
    Reject,
}

/// How the client treats an inward quantity above the pending quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverReceiptPolicy {
    /// Hard validation failure before submit
    #[default]
    Reject,
    /// Skip the client check; the server's atomic check still applies
    DeferToServer,
}

/// Policies applied by the builder and by server-side re-validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    pub negative_totals: NegativeTotalPolicy,
    pub over_receipt: OverReceiptPolicy,
}
