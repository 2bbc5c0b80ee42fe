//! Uptime Keeper Core
//!
//! Shared domain types, the slot clock and the worker-name normalisation
//! rules used by every pool adapter, the reconciliation engine and the
//! status read service.

use thiserror::Error;

pub mod domain;
pub mod names;
pub mod slot;

pub use domain::{MinerRecord, MinerStatus, WorkerObservation, NEGATIVE_LABELS, POSITIVE_LABELS};
pub use slot::SlotId;

/// Core-level error type. Most components compose this via `#[from]` into
/// their own error enum rather than producing it directly.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid slot identifier: {0}")]
    InvalidSlot(String),
    #[error("configuration error: {0}")]
    Config(String),
}
