//! Scheduler errors.

use csp_02_participant_ledger::LedgerError;
use shared_types::NodeError;
use thiserror::Error;

/// Payout Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Ledger operation failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Node query failed after retries.
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}
