//! # Domain Errors
//!
//! Error types for the Participant Ledger.

use super::entities::BatchStatus;
use shared_types::{Amount, BlockHash, BlockHeight, ParticipantId};
use thiserror::Error;

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError {
        /// Underlying error text
        message: String,
    },
    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError {
        /// Underlying error text
        message: String,
    },
}

/// Participant Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The block (or its reward event) has already been applied.
    #[error("Duplicate event at height {height} ({hash})")]
    DuplicateEvent {
        /// Height of the duplicate block
        height: BlockHeight,
        /// Hash of the duplicate block
        hash: BlockHash,
    },

    /// The block does not extend the processed chain.
    #[error("Chain reorg at height {height}: expected parent {expected}, got {got}")]
    ChainReorg {
        /// Height of the offending block
        height: BlockHeight,
        /// Marker hash
        expected: BlockHash,
        /// Parent hash of the offending block
        got: BlockHash,
    },

    /// The block skips heights.
    #[error("Height gap: expected {expected}, got {got}")]
    HeightGap {
        /// Next height the ledger can accept
        expected: BlockHeight,
        /// Height that was offered
        got: BlockHeight,
    },

    /// Persisted state is inconsistent; mutations are halted.
    #[error("Corrupt ledger state: {0}")]
    CorruptLedgerState(String),

    /// Mutations refused because the ledger is halted.
    #[error("Ledger halted: {0}")]
    Halted(String),

    /// A debit exceeds the participant's unpaid balance.
    #[error("Insufficient balance for {participant}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Debited participant
        participant: ParticipantId,
        /// Requested debit
        requested: Amount,
        /// Unpaid balance
        available: Amount,
    },

    /// Participant has no ledger record.
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    /// Batch id has no record.
    #[error("Payout batch not found: {0}")]
    BatchNotFound(u64),

    /// Batch status change not allowed.
    #[error("Invalid batch transition for {id}: {from:?} -> {to:?}")]
    InvalidBatchTransition {
        /// Batch id
        id: u64,
        /// Current status
        from: BatchStatus,
        /// Requested status
        to: BatchStatus,
    },

    /// Commit contents violate a ledger invariant.
    #[error("Invalid commit: {0}")]
    InvalidCommit(String),

    /// Rollback target is above the marker or beyond the journal.
    #[error("Cannot roll back to height {0}")]
    InvalidRollback(BlockHeight),

    /// Storage failure; the transaction was not applied.
    #[error("Storage error: {0}")]
    Store(#[from] KVStoreError),
}

impl LedgerError {
    /// Whether this error must halt further mutations.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::CorruptLedgerState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_state_is_fatal() {
        assert!(LedgerError::CorruptLedgerState("bad marker".to_string()).is_fatal());
        assert!(!LedgerError::BatchNotFound(1).is_fatal());
    }

    #[test]
    fn test_store_error_conversion() {
        let kv_err = KVStoreError::IOError {
            message: "disk failure".to_string(),
        };
        let err: LedgerError = kv_err.into();
        assert!(err.to_string().contains("disk failure"));
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = LedgerError::InsufficientBalance {
            participant: ParticipantId::new("alice"),
            requested: 10,
            available: 3,
        };
        assert!(err.to_string().contains("alice"));
        assert!(err.to_string().contains("requested 10"));
    }
}
