//! gpumgr-scheduler: Advisory GPU allocation engine
//!
//! This crate provides the allocation engine shared by the REST layer and the
//! background tasks:
//! - Allocation ledger
//! - Grant and rebalance policy
//! - The `GpuManager` request/release/status API
//! - Reconciliation and health loops

pub mod ledger;
pub mod manager;
pub mod policy;
pub mod reconciler;

pub use ledger::AllocationLedger;
pub use manager::{GpuManager, ManagerState, ManagerStatus, ReconcileReport, ReleaseOutcome};
pub use policy::{Assignment, Grant};
pub use reconciler::BackgroundTasks;
