//! Recovery errors.

use csp_02_participant_ledger::LedgerError;
use shared_types::{BlockHeight, NodeError};
use thiserror::Error;

/// Recovery errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    /// Ledger operation failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Node query failed after retries.
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// No common ancestor within the allowed depth.
    #[error("Reorg below height {from} is deeper than {max_depth} blocks")]
    ReorgTooDeep { from: BlockHeight, max_depth: u64 },

    /// The journal does not reach back to the common ancestor.
    #[error("No journal entry at height {0}; cannot roll back further")]
    BeyondJournal(BlockHeight),
}

impl RecoveryError {
    /// Errors that need an operator before the pool may continue.
    pub fn needs_operator(&self) -> bool {
        match self {
            RecoveryError::Ledger(e) => e.is_fatal(),
            RecoveryError::Node(_) => false,
            RecoveryError::ReorgTooDeep { .. } | RecoveryError::BeyondJournal(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_errors() {
        assert!(RecoveryError::BeyondJournal(7).needs_operator());
        assert!(!RecoveryError::Node(NodeError::Timeout(5)).needs_operator());
        assert!(RecoveryError::Ledger(LedgerError::CorruptLedgerState("x".into())).needs_operator());
    }
}
