//! # Recovery (csp-05)
//!
//! Reconciles the persisted ledger with the node: at startup before the
//! watcher and scheduler start, and whenever the watcher reports a reorg.
//!
//! ## Startup Order
//!
//! 1. `verify_integrity` on the ledger (failure halts the pool)
//! 2. Chain reconciliation: roll back to the common ancestor
//! 3. Batch reconciliation (only when this process manages payouts)
//!
//! The watcher then resumes from the reconciled marker.

pub mod domain;
pub mod service;

pub use domain::{BatchRecovery, ChainReconciliation, RecoveryConfig, RecoveryError, StartupReport};
pub use service::Reconciler;
