//! # Payout Scheduler Subsystem (csp-04)
//!
//! Pays accumulated rewards out of the pool's reward wallet.
//!
//! ## Crash Safety
//!
//! | Stage | Ledger | On restart |
//! |-------|--------|------------|
//! | debited | batch `Pending` | located by comment or reverted |
//! | sent | batch `Submitted` | confirmed, reverted if unknown, flagged if conflicted |
//! | deep enough | batch `Confirmed` | nothing to do |
//!
//! A payout transaction is sent at most once per batch.

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{is_eligible, plan_batches, SchedulerConfig, SchedulerError};
pub use ports::outbound::{MockPayoutTransport, PayoutTransport, SendBehaviour, SentPayout, TxStatus};
pub use service::{ConfirmReport, PayoutReport, PayoutScheduler, ReconcileReport, TickReport};
