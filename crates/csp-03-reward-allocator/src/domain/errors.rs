//! Allocator errors.

use csp_02_participant_ledger::LedgerError;
use thiserror::Error;

/// Reward Allocator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// The ledger refused the block.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl AllocatorError {
    /// The block does not extend the ledger marker.
    pub fn is_reorg(&self) -> bool {
        matches!(self, AllocatorError::Ledger(LedgerError::ChainReorg { .. }))
    }
}
