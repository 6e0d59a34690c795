//! # Payout Scheduler Service
//!
//! Periodically pays out participants whose unpaid balance crossed the
//! threshold. The ledger is debited *before* a transaction is sent, so a
//! crash can never pay twice; what happens after a failed send depends on
//! whether the node may have broadcast the transaction:
//!
//! | Send result | Batch | Next step |
//! |-------------|-------|-----------|
//! | txid | `Submitted` | wait for confirmations |
//! | `Unreachable` / `TransactionRejected` / `InsufficientFunds` | `Failed` | debit reverted |
//! | `Timeout` / `Protocol` | stays `Pending` | located via `find_payout` next round |
//!
//! Payout sends are never retried.

use crate::domain::{plan_batches, SchedulerConfig, SchedulerError};
use crate::ports::outbound::{PayoutTransport, TxStatus};
use csp_02_participant_ledger::{BatchStatus, LedgerError, ParticipantLedger, PayoutBatch};
use shared_types::{BlockHeight, HealthMonitor, NodeError, ParameterSchedule};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Result of [`PayoutScheduler::reconcile_pending`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Batches found on the node and moved to `Submitted`.
    pub located: Vec<u64>,
    /// Batches the node never saw; debit reverted.
    pub reverted: Vec<u64>,
}

/// Result of [`PayoutScheduler::run_payouts`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PayoutReport {
    /// Batches accepted by the node.
    pub submitted: Vec<u64>,
    /// Batches that definitely failed; debit reverted.
    pub failed: Vec<u64>,
    /// Batches whose send outcome is unknown; left `Pending`.
    pub ambiguous: Vec<u64>,
}

/// Result of [`PayoutScheduler::confirm_submitted`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfirmReport {
    pub confirmed: Vec<u64>,
    pub flagged: Vec<u64>,
}

/// Result of one [`PayoutScheduler::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reconciled: ReconcileReport,
    pub payouts: PayoutReport,
    pub confirmations: ConfirmReport,
}

/// The Payout Scheduler.
pub struct PayoutScheduler {
    ledger: Arc<ParticipantLedger>,
    transport: Arc<dyn PayoutTransport>,
    schedule: ParameterSchedule,
    config: SchedulerConfig,
    health: Arc<HealthMonitor>,
}

impl PayoutScheduler {
    pub fn new(
        ledger: Arc<ParticipantLedger>,
        transport: Arc<dyn PayoutTransport>,
        schedule: ParameterSchedule,
        config: SchedulerConfig,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            ledger,
            transport,
            schedule,
            config,
            health,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Resolve `Pending` batches left by an ambiguous send or a crash.
    ///
    /// A batch the node knows about (by its comment) becomes `Submitted`;
    /// one it has never seen is reverted. Nothing is resent.
    pub async fn reconcile_pending(
        &self,
        current_height: BlockHeight,
    ) -> Result<ReconcileReport, SchedulerError> {
        let mut report = ReconcileReport::default();
        for batch in self.ledger.batches_with_status(BatchStatus::Pending)? {
            let transport = Arc::clone(&self.transport);
            let id = batch.id;
            let found = self.observe(
                self.config
                    .retry
                    .run("find_payout", || transport.find_payout(id))
                    .await,
            )?;
            match found {
                Some(txid) => {
                    info!("[csp-04] Pending batch {} found on node as {}", id, txid);
                    self.ledger_op(self.ledger.mark_submitted(id, txid, current_height))?;
                    report.located.push(id);
                }
                None => {
                    self.ledger_op(
                        self.ledger
                            .revert_batch(id, "payout transaction not found on node"),
                    )?;
                    report.reverted.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Pay every eligible participant, one transaction per chunk.
    pub async fn run_payouts(
        &self,
        current_height: BlockHeight,
    ) -> Result<PayoutReport, SchedulerError> {
        let mut report = PayoutReport::default();
        let params = self.schedule.at(current_height);
        let participants = self.ledger.participants()?;
        let plans = plan_batches(
            &participants,
            params,
            current_height,
            self.config.max_outputs_per_tx,
        );
        if plans.is_empty() {
            debug!("[csp-04] No participant due a payout at height {}", current_height);
            return Ok(report);
        }

        for entries in plans {
            let batch = self.ledger_op(self.ledger.debit_for_payout(entries, current_height))?;
            match self
                .config
                .retry
                .run_once(self.transport.send_payout(&batch))
                .await
            {
                Ok(txid) => {
                    self.health.record_success();
                    self.ledger_op(self.ledger.mark_submitted(batch.id, txid.clone(), current_height))?;
                    info!(
                        "[csp-04] Batch {} sent as {} ({} outputs, total {})",
                        batch.id,
                        txid,
                        batch.entries.len(),
                        batch.total()
                    );
                    report.submitted.push(batch.id);
                }
                Err(e) if e.is_ambiguous() => {
                    self.health.record_failure(&e.to_string());
                    warn!(
                        "[csp-04] Batch {} outcome unknown ({}); left pending until located",
                        batch.id, e
                    );
                    report.ambiguous.push(batch.id);
                    break;
                }
                Err(e) => {
                    let stop = self.payout_failed(&batch, &e)?;
                    report.failed.push(batch.id);
                    if stop {
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Follow submitted batches until they are deep enough.
    pub async fn confirm_submitted(
        &self,
        current_height: BlockHeight,
    ) -> Result<ConfirmReport, SchedulerError> {
        let mut report = ConfirmReport::default();
        for batch in self.ledger.batches_with_status(BatchStatus::Submitted)? {
            let txid = match &batch.txid {
                Some(txid) => txid.clone(),
                None => {
                    self.flag(&batch, "submitted batch has no txid", &mut report)?;
                    continue;
                }
            };
            let transport = Arc::clone(&self.transport);
            let status = match self
                .config
                .retry
                .run("tx_status", || transport.tx_status(&txid))
                .await
            {
                Ok(status) => {
                    self.health.record_success();
                    status
                }
                Err(e) => {
                    self.health.record_failure(&e.to_string());
                    warn!("[csp-04] Status of batch {} unavailable: {}", batch.id, e);
                    continue;
                }
            };

            match status {
                TxStatus::Confirmations(n) if n >= self.config.payout_confirmations => {
                    self.ledger_op(self.ledger.mark_confirmed(batch.id))?;
                    report.confirmed.push(batch.id);
                }
                TxStatus::Conflicted => {
                    self.flag(&batch, &format!("transaction {} conflicted", txid), &mut report)?;
                }
                _ => {
                    let submitted = batch.submitted_height.unwrap_or(batch.created_height);
                    if current_height.saturating_sub(submitted) > self.config.review_after_blocks {
                        self.flag(
                            &batch,
                            &format!(
                                "transaction {} unconfirmed {} blocks after submission",
                                txid,
                                current_height - submitted
                            ),
                            &mut report,
                        )?;
                    }
                }
            }
        }
        Ok(report)
    }

    /// One payout round: reconcile, pay, confirm.
    pub async fn tick(&self, current_height: BlockHeight) -> Result<TickReport, SchedulerError> {
        if self.health.is_halted() || self.ledger.is_halted() {
            warn!("[csp-04] Pool halted, skipping payout round");
            return Ok(TickReport::default());
        }
        let reconciled = self.reconcile_pending(current_height).await?;
        let payouts = self.run_payouts(current_height).await?;
        let confirmations = self.confirm_submitted(current_height).await?;
        Ok(TickReport {
            reconciled,
            payouts,
            confirmations,
        })
    }

    /// Payout loop; returns when `shutdown` flips to `true`.
    ///
    /// Each round runs at the ledger's processed height.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[csp-04] Payout scheduler started (every {:?}, {} outputs per tx)",
            self.config.payout_interval(),
            self.config.max_outputs_per_tx
        );
        let mut ticker = tokio::time::interval(self.config.payout_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let height = match self.ledger.marker() {
                        Ok(Some(marker)) => marker.height,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("[csp-04] Cannot read ledger marker: {}", e);
                            continue;
                        }
                    };
                    match self.tick(height).await {
                        Ok(report) if report != TickReport::default() => {
                            debug!("[csp-04] Round at height {}: {:?}", height, report);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("[csp-04] Payout round failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("[csp-04] Payout scheduler stopped");
    }

    /// Revert a definitely failed batch. Returns whether the round must stop.
    fn payout_failed(&self, batch: &PayoutBatch, err: &NodeError) -> Result<bool, SchedulerError> {
        self.ledger_op(self.ledger.revert_batch(batch.id, &err.to_string()))?;
        match err {
            NodeError::Unreachable(_) => {
                self.health.record_failure(&err.to_string());
                warn!("[csp-04] Node unreachable, batch {} reverted", batch.id);
                Ok(true)
            }
            NodeError::InsufficientFunds(_) => {
                error!(
                    "[csp-04] OPERATOR ALERT: reward wallet cannot fund batch {} (total {}): {}",
                    batch.id,
                    batch.total(),
                    err
                );
                Ok(true)
            }
            _ => {
                error!(
                    "[csp-04] OPERATOR ALERT: batch {} rejected by node: {}",
                    batch.id, err
                );
                Ok(false)
            }
        }
    }

    fn flag(
        &self,
        batch: &PayoutBatch,
        reason: &str,
        report: &mut ConfirmReport,
    ) -> Result<(), SchedulerError> {
        if !batch.review_flagged {
            self.ledger_op(self.ledger.flag_for_review(batch.id, reason))?;
            report.flagged.push(batch.id);
        }
        Ok(())
    }

    fn observe<T>(&self, result: Result<T, NodeError>) -> Result<T, SchedulerError> {
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

    fn ledger_op<T>(&self, result: Result<T, LedgerError>) -> Result<T, SchedulerError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.health.halt(e.to_string());
            }
        }
        result.map_err(SchedulerError::from)
    }
}
