//! Reconciliation Engine
//!
//! Ties the pool adapters, the key-value side-state and the persistence
//! adapter together into the per-tick confirmation state machine (§4.6),
//! backed by a process-local Slot Coordinator (§4.7).

pub mod coordinator;
pub mod grouping;
pub mod reconcile;

pub use coordinator::SlotCoordinator;
pub use grouping::GroupKey;
pub use reconcile::{
    EngineError, ReconciliationEngine, TickReport, GRACE_MINUTES, OFFLINE_CONFIRM_MINUTES,
};
