//! # Error Types
//!
//! Node error taxonomy shared by every outbound node port.

use thiserror::Error;

/// Errors reported by the attached node.
///
/// "Node unreachable" and "transaction rejected" are always distinct kinds so
/// callers can decide between retrying and alerting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Connection to the node failed; nothing reached the node.
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// The node did not answer in time. The request may have been processed.
    #[error("Node call timed out after {0} ms")]
    Timeout(u64),

    /// The node refused a payout transaction.
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// The reward wallet cannot fund the payout.
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// No block at the requested height on the best chain.
    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    /// The node answered with something we could not interpret.
    #[error("Malformed node response: {0}")]
    Protocol(String),
}

impl NodeError {
    /// Transient errors are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Unreachable(_) | NodeError::Timeout(_) | NodeError::Protocol(_)
        )
    }

    /// Errors after which a submitted transaction may or may not exist.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, NodeError::Timeout(_) | NodeError::Protocol(_))
    }

    /// Errors that need operator attention when raised by a payout.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            NodeError::TransactionRejected(_) | NodeError::InsufficientFunds(_)
        )
    }
}
