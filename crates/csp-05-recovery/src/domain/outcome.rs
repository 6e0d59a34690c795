//! Reconciliation outcomes.

use csp_02_participant_ledger::LedgerStats;
use shared_types::ProcessedHeightMarker;

/// Result of comparing the ledger marker with the node's best chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainReconciliation {
    /// Nothing processed yet.
    Fresh,
    /// The marker is still on the best chain.
    InSync(ProcessedHeightMarker),
    /// Blocks above the common ancestor were reversed.
    RolledBack {
        from: ProcessedHeightMarker,
        to: ProcessedHeightMarker,
    },
}

impl ChainReconciliation {
    /// Marker after reconciliation.
    pub fn marker(&self) -> Option<ProcessedHeightMarker> {
        match self {
            ChainReconciliation::Fresh => None,
            ChainReconciliation::InSync(m) => Some(*m),
            ChainReconciliation::RolledBack { to, .. } => Some(*to),
        }
    }

    /// Number of blocks reversed.
    pub fn depth(&self) -> u64 {
        match self {
            ChainReconciliation::RolledBack { from, to } => from.height - to.height,
            _ => 0,
        }
    }
}

/// Batches settled by [`crate::Reconciler::reconcile_batches`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchRecovery {
    /// Pending batches found on the node.
    pub located: Vec<u64>,
    /// Batches the node never saw; debit reverted.
    pub reverted: Vec<u64>,
    /// Submitted batches deep enough.
    pub confirmed: Vec<u64>,
    /// Conflicted batches left for the operator.
    pub flagged: Vec<u64>,
    /// Submitted batches still waiting for confirmations.
    pub waiting: Vec<u64>,
}

/// Everything done by [`crate::Reconciler::startup`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartupReport {
    pub stats: LedgerStats,
    pub chain: ChainReconciliation,
    /// `None` when payouts are not managed by this process.
    pub batches: Option<BatchRecovery>,
}
