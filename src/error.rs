//! Operator-visible error taxonomy.
//!
//! Plumbing (config, storage open, source connect) uses `anyhow`. The paths an
//! operator drives (manual adjust, checkout, confirm, cancel) return `TillError`
//! so callers can tell a rejected action from a failed write.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TillError {
    #[error("unknown item: {0}")]
    UnknownItem(String),

    #[error("invalid quantity for {key}: {reason}")]
    InvalidQuantity { key: String, reason: String },

    #[error("cart is empty or totals zero")]
    EmptyCart,

    #[error("finalize already in progress")]
    FinalizeInProgress,

    #[error("no payment pending")]
    NoPaymentPending,

    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl TillError {
    /// True when the action was refused because another checkout owns the cart.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TillError::FinalizeInProgress)
    }
}

pub type TillResult<T> = Result<T, TillError>;
