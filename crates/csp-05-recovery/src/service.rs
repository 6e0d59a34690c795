//! # Reconciler Service
//!
//! Brings the ledger back in line with the node after a restart or a reorg.
//!
//! ## Chain
//!
//! The marker hash is compared with the node's best chain at the marker
//! height. When they differ, the `AppliedBlock` journal is walked downward
//! (each entry's parent hash against the node's hash one height lower)
//! until both agree; everything above that common ancestor is rolled back.
//!
//! ## Batches
//!
//! | Ledger state | Node says | Result |
//! |--------------|-----------|--------|
//! | `Pending` | transaction with the batch comment | `Submitted` |
//! | `Pending` | nothing | reverted |
//! | `Submitted` | `Confirmations(n >= required)` | `Confirmed` |
//! | `Submitted` | `Unknown` | reverted |
//! | `Submitted` | `Conflicted` | flagged for review |
//!
//! No payout is ever resent here.

use crate::domain::{
    BatchRecovery, ChainReconciliation, RecoveryConfig, RecoveryError, StartupReport,
};
use csp_01_chain_watcher::ChainSource;
use csp_02_participant_ledger::{BatchStatus, LedgerError, ParticipantLedger};
use csp_04_payout_scheduler::{PayoutTransport, TxStatus};
use shared_types::{BlockHash, BlockHeight, HealthMonitor, NodeError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The Reconciler.
pub struct Reconciler {
    ledger: Arc<ParticipantLedger>,
    chain: Arc<dyn ChainSource>,
    transport: Option<Arc<dyn PayoutTransport>>,
    config: RecoveryConfig,
    health: Arc<HealthMonitor>,
}

impl Reconciler {
    /// `transport` is `None` when this process does not manage payouts.
    pub fn new(
        ledger: Arc<ParticipantLedger>,
        chain: Arc<dyn ChainSource>,
        transport: Option<Arc<dyn PayoutTransport>>,
        config: RecoveryConfig,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            ledger,
            chain,
            transport,
            config,
            health,
        }
    }

    /// Full startup sequence: integrity check, chain, then batches.
    ///
    /// An integrity failure halts the pool and is returned; the ledger stays
    /// readable for the status document.
    pub async fn startup(&self) -> Result<StartupReport, RecoveryError> {
        let stats = match self.ledger.verify_integrity() {
            Ok(stats) => stats,
            Err(e) => {
                self.health.halt(format!("ledger integrity check failed: {}", e));
                return Err(e.into());
            }
        };
        info!(
            "[csp-05] Ledger opened: marker {:?}, {} participants, {} pending and {} submitted batches",
            stats.marker_height, stats.participants, stats.pending_batches, stats.submitted_batches
        );

        let chain = self.reconcile_chain().await?;
        let batches = match self.transport {
            Some(_) => {
                let height = chain.marker().map_or(0, |m| m.height);
                Some(self.reconcile_batches(height).await?)
            }
            None => None,
        };

        Ok(StartupReport {
            stats,
            chain,
            batches,
        })
    }

    /// Roll the ledger back to the highest block it shares with the node.
    pub async fn reconcile_chain(&self) -> Result<ChainReconciliation, RecoveryError> {
        let marker = match self.ledger.marker()? {
            Some(marker) => marker,
            None => return Ok(ChainReconciliation::Fresh),
        };

        let mut height = marker.height;
        let mut expected = marker.hash;
        loop {
            if self.on_best_chain(height, &expected).await? {
                break;
            }
            if marker.height - height >= self.config.max_reorg_depth {
                return Err(self.operator_error(RecoveryError::ReorgTooDeep {
                    from: marker.height,
                    max_depth: self.config.max_reorg_depth,
                }));
            }
            let applied = self
                .ledger
                .applied_block(height)?
                .ok_or_else(|| self.operator_error(RecoveryError::BeyondJournal(height)))?;
            if height == 0 {
                return Err(self.operator_error(RecoveryError::BeyondJournal(0)));
            }
            debug!(
                "[csp-05] Block {} at {} is off the best chain, checking parent",
                applied.hash, height
            );
            expected = applied.prev_hash;
            height -= 1;
        }

        if height == marker.height {
            debug!("[csp-05] Marker {} at {} is on the best chain", marker.hash, marker.height);
            return Ok(ChainReconciliation::InSync(marker));
        }

        let to = match self.ledger.rollback_to(height) {
            Ok(to) => to,
            Err(e) => return Err(self.ledger_error(e)),
        };
        warn!(
            "[csp-05] Reorg: rolled back {} blocks from {} to common ancestor {}",
            marker.height - to.height,
            marker.height,
            to.height
        );
        Ok(ChainReconciliation::RolledBack { from: marker, to })
    }

    /// Settle every `Pending` and `Submitted` batch against the node.
    pub async fn reconcile_batches(
        &self,
        current_height: BlockHeight,
    ) -> Result<BatchRecovery, RecoveryError> {
        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => return Ok(BatchRecovery::default()),
        };
        let mut report = BatchRecovery::default();

        for batch in self.ledger.batches_with_status(BatchStatus::Pending)? {
            let id = batch.id;
            let found = self.node(
                self.config
                    .retry
                    .run("find_payout", || transport.find_payout(id))
                    .await,
            )?;
            match found {
                Some(txid) => {
                    info!("[csp-05] Pending batch {} was sent as {}", id, txid);
                    self.ledger_op(self.ledger.mark_submitted(id, txid, current_height))?;
                    report.located.push(id);
                }
                None => {
                    self.ledger_op(self.ledger.revert_batch(id, "never reached the node"))?;
                    report.reverted.push(id);
                }
            }
        }

        for batch in self.ledger.batches_with_status(BatchStatus::Submitted)? {
            let id = batch.id;
            let txid = match batch.txid {
                Some(txid) => txid,
                None => {
                    self.ledger_op(self.ledger.flag_for_review(id, "submitted batch has no txid"))?;
                    report.flagged.push(id);
                    continue;
                }
            };
            let status = self.node(
                self.config
                    .retry
                    .run("tx_status", || transport.tx_status(&txid))
                    .await,
            )?;
            match status {
                TxStatus::Confirmations(n) if n >= self.config.payout_confirmations => {
                    self.ledger_op(self.ledger.mark_confirmed(id))?;
                    report.confirmed.push(id);
                }
                TxStatus::Confirmations(_) => report.waiting.push(id),
                TxStatus::Unknown => {
                    self.ledger_op(
                        self.ledger
                            .revert_batch(id, &format!("node does not know transaction {}", txid)),
                    )?;
                    report.reverted.push(id);
                }
                TxStatus::Conflicted => {
                    if !batch.review_flagged {
                        self.ledger_op(
                            self.ledger
                                .flag_for_review(id, &format!("transaction {} conflicted", txid)),
                        )?;
                    }
                    report.flagged.push(id);
                }
            }
        }

        if report != BatchRecovery::default() {
            info!("[csp-05] Batch reconciliation: {:?}", report);
        }
        Ok(report)
    }

    async fn on_best_chain(&self, height: BlockHeight, hash: &BlockHash) -> Result<bool, RecoveryError> {
        let chain = Arc::clone(&self.chain);
        match self
            .config
            .retry
            .run("block_hash", || chain.block_hash(height))
            .await
        {
            Ok(node_hash) => {
                self.health.record_success();
                Ok(node_hash == *hash)
            }
            // The node's chain is shorter than ours.
            Err(NodeError::BlockNotFound(_)) => Ok(false),
            Err(e) => {
                self.health.record_failure(&e.to_string());
                Err(e.into())
            }
        }
    }

    fn node<T>(&self, result: Result<T, NodeError>) -> Result<T, RecoveryError> {
        match result {
            Ok(value) => {
                self.health.record_success();
                Ok(value)
            }
            Err(e) => {
                self.health.record_failure(&e.to_string());
                Err(e.into())
            }
        }
    }

    fn ledger_op<T>(&self, result: Result<T, LedgerError>) -> Result<T, RecoveryError> {
        result.map_err(|e| self.ledger_error(e))
    }

    fn ledger_error(&self, e: LedgerError) -> RecoveryError {
        if e.is_fatal() {
            self.health.halt(e.to_string());
        }
        e.into()
    }

    fn operator_error(&self, e: RecoveryError) -> RecoveryError {
        error!("[csp-05] OPERATOR ALERT: {}", e);
        self.health.halt(e.to_string());
        e
    }
}
