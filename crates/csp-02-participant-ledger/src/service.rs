//! # Participant Ledger Service
//!
//! Transactional bookkeeping of stakes, unpaid rewards and payout batches.
//!
//! ## Transactions
//!
//! Every mutating operation runs inside a [`Txn`]: reads go through an
//! overlay of the operation's own pending writes, and the accumulated writes
//! are committed with a single `atomic_batch_write`. The store mutex is held
//! for the whole operation, so there is exactly one writer and readers only
//! ever observe committed batches.
//!
//! ## Halting
//!
//! Any record that fails to decode, or any inconsistency found by
//! [`ParticipantLedger::verify_integrity`], raises `CorruptLedgerState` and
//! halts the ledger. A halted ledger refuses every mutation but keeps
//! answering reads until [`ParticipantLedger::resume`] is called by an
//! operator.
//!
//! ## Journal retention
//!
//! Only the last `journal_depth` blocks keep their journal entry, reward
//! event key and per-block stake history. Older history rows fold into a
//! baseline row at height 0, so storage grows with the participant count
//! and not with the chain.

use crate::domain::entities::{
    AppliedBlock, BatchStatus, BlockCommit, Credit, LedgerSnapshot, LedgerStats, Participant,
    PayoutBatch, PayoutEntry,
};
use crate::domain::errors::LedgerError;
use crate::domain::keys;
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{
    Amount, BlockHash, BlockHeight, ParticipantId, ProcessedHeightMarker, StakeChange,
    StakeChangeKind, TxId,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

/// Overlay of pending writes on top of the committed store.
struct Txn<'a> {
    store: &'a dyn KeyValueStore,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> Txn<'a> {
    fn new(store: &'a dyn KeyValueStore) -> Self {
        Self {
            store,
            writes: BTreeMap::new(),
        }
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.store.get(key)?),
        }
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, LedgerError> {
        match self.get_raw(key)? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(value)
            .map_err(|e| LedgerError::InvalidCommit(format!("encode failed: {}", e)))?;
        self.writes.insert(key, Some(bytes));
        Ok(())
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Committed entries under a prefix. Pending writes are not included.
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, LedgerError> {
        Ok(self.store.prefix_scan(prefix)?)
    }

    fn into_batch(self) -> Vec<BatchOperation> {
        self.writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOperation::put(key, value),
                None => BatchOperation::delete(key),
            })
            .collect()
    }

    fn marker(&self) -> Result<Option<ProcessedHeightMarker>, LedgerError> {
        self.get(keys::MARKER)
    }

    fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, LedgerError> {
        self.get(&keys::participant(id))
    }

    fn participant_or_new(&self, id: &ParticipantId) -> Result<Participant, LedgerError> {
        Ok(self
            .participant(id)?
            .unwrap_or_else(|| Participant::new(id.clone())))
    }

    fn put_participant(&mut self, participant: &Participant) -> Result<(), LedgerError> {
        self.put(keys::participant(&participant.id), participant)
    }

    fn operator_fee(&self) -> Result<Amount, LedgerError> {
        Ok(self.get(keys::OPERATOR_FEE)?.unwrap_or(0))
    }

    fn applied(&self, height: BlockHeight) -> Result<Option<AppliedBlock>, LedgerError> {
        self.get(&keys::applied(height))
    }

    fn batch(&self, id: u64) -> Result<PayoutBatch, LedgerError> {
        self.get(&keys::batch(id))?
            .ok_or(LedgerError::BatchNotFound(id))
    }

    fn batches(&self) -> Result<Vec<PayoutBatch>, LedgerError> {
        self.scan(keys::BATCH_PREFIX)?
            .iter()
            .map(|(k, v)| decode(k, v))
            .collect()
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, LedgerError> {
    bincode::deserialize(bytes).map_err(|e| {
        LedgerError::CorruptLedgerState(format!(
            "undecodable record {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
    })
}

fn overflow(what: &str, id: &ParticipantId) -> LedgerError {
    LedgerError::InvalidCommit(format!("{} overflows for {}", what, id))
}

/// Blocks kept in the journal unless configured otherwise.
pub const DEFAULT_JOURNAL_DEPTH: BlockHeight = 1_000;

/// The Participant Ledger.
///
/// Sole owner of participant balances and payout batches.
pub struct ParticipantLedger {
    store: Mutex<Box<dyn KeyValueStore>>,
    halted: RwLock<Option<String>>,
    journal_depth: BlockHeight,
}

impl ParticipantLedger {
    /// Create a ledger over a key-value store.
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store: Mutex::new(store),
            halted: RwLock::new(None),
            journal_depth: DEFAULT_JOURNAL_DEPTH,
        }
    }

    /// Keep journal entries for the last `depth` blocks only.
    ///
    /// Must be at least the deepest reorg the pool is expected to unwind.
    pub fn with_journal_depth(mut self, depth: BlockHeight) -> Self {
        self.journal_depth = depth.max(1);
        self
    }

    /// Number of blocks kept in the journal.
    pub fn journal_depth(&self) -> BlockHeight {
        self.journal_depth
    }

    // =========================================================================
    // Transaction plumbing
    // =========================================================================

    fn read<T>(&self, f: impl FnOnce(&Txn<'_>) -> Result<T, LedgerError>) -> Result<T, LedgerError> {
        let store = self.store.lock();
        let txn = Txn::new(&**store);
        f(&txn).map_err(|e| self.escalate(e))
    }

    fn mutate<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut Txn<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        if let Some(reason) = self.halt_reason() {
            return Err(LedgerError::Halted(reason));
        }

        let mut store = self.store.lock();
        let mut txn = Txn::new(&**store);
        let value = f(&mut txn).map_err(|e| self.escalate(e))?;
        let ops = txn.into_batch();
        let count = ops.len();

        store.atomic_batch_write(ops).map_err(|e| {
            error!("[csp-02] {} not applied, storage failure: {}", op, e);
            LedgerError::from(e)
        })?;
        debug!("[csp-02] {} committed ({} writes)", op, count);
        Ok(value)
    }

    fn escalate(&self, err: LedgerError) -> LedgerError {
        if let LedgerError::CorruptLedgerState(reason) = &err {
            self.halt(reason.clone());
        }
        err
    }

    // =========================================================================
    // Halt control
    // =========================================================================

    /// Refuse all further mutations.
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut halted = self.halted.write();
        if halted.is_none() {
            error!("[csp-02] Ledger halted: {}", reason);
            *halted = Some(reason);
        }
    }

    /// Whether mutations are refused.
    pub fn is_halted(&self) -> bool {
        self.halted.read().is_some()
    }

    /// Why the ledger is halted.
    pub fn halt_reason(&self) -> Option<String> {
        self.halted.read().clone()
    }

    /// Lift a halt after manual resolution.
    pub fn resume(&self) {
        if let Some(reason) = self.halted.write().take() {
            warn!("[csp-02] Ledger resumed by operator (was halted: {})", reason);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Highest fully applied block.
    pub fn marker(&self) -> Result<Option<ProcessedHeightMarker>, LedgerError> {
        self.read(|txn| txn.marker())
    }

    /// One participant's record.
    pub fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, LedgerError> {
        self.read(|txn| txn.participant(id))
    }

    /// All participants, ordered by id.
    pub fn participants(&self) -> Result<Vec<Participant>, LedgerError> {
        self.read(|txn| {
            txn.scan(keys::PARTICIPANT_PREFIX)?
                .iter()
                .map(|(k, v)| decode(k, v))
                .collect()
        })
    }

    /// Accumulated operator fee (pool fee plus rounding remainders).
    pub fn operator_fee_balance(&self) -> Result<Amount, LedgerError> {
        self.read(|txn| txn.operator_fee())
    }

    /// Journal entry of an applied block.
    pub fn applied_block(&self, height: BlockHeight) -> Result<Option<AppliedBlock>, LedgerError> {
        self.read(|txn| txn.applied(height))
    }

    /// Whether the reward event of a block has been applied.
    pub fn has_reward_event(&self, block_hash: &BlockHash) -> Result<bool, LedgerError> {
        self.read(|txn| Ok(txn.get_raw(&keys::event(block_hash))?.is_some()))
    }

    /// Stakes reflecting every change confirmed strictly before `at_height`.
    ///
    /// Heights above the marker read the participant records directly.
    /// Heights inside the pruned part of the journal see the folded baseline.
    pub fn snapshot(&self, at_height: BlockHeight) -> Result<LedgerSnapshot, LedgerError> {
        self.read(|txn| {
            if txn.marker()?.map_or(true, |m| at_height > m.height) {
                let stakes = txn
                    .scan(keys::PARTICIPANT_PREFIX)?
                    .iter()
                    .map(|(k, v)| decode::<Participant>(k, v).map(|p| (p.id, p.staked)))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(LedgerSnapshot::new(at_height, stakes));
            }

            let mut stakes: BTreeMap<ParticipantId, Amount> = BTreeMap::new();
            for (key, value) in txn.scan(keys::HISTORY_PREFIX)? {
                let (height, id) = keys::parse_history(&key).ok_or_else(|| {
                    LedgerError::CorruptLedgerState(format!(
                        "malformed history key {}",
                        String::from_utf8_lossy(&key)
                    ))
                })?;
                if height >= at_height {
                    break;
                }
                let stake: Amount = decode(&key, &value)?;
                stakes.insert(id, stake);
            }
            Ok(LedgerSnapshot::new(at_height, stakes))
        })
    }

    /// One payout batch.
    pub fn batch(&self, id: u64) -> Result<PayoutBatch, LedgerError> {
        self.read(|txn| txn.batch(id))
    }

    /// Batches in a given status, ordered by id.
    pub fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<PayoutBatch>, LedgerError> {
        self.read(|txn| {
            Ok(txn
                .batches()?
                .into_iter()
                .filter(|b| b.status == status)
                .collect())
        })
    }

    /// Aggregate figures for status reporting.
    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        self.read(|txn| {
            let mut stats = LedgerStats {
                marker_height: txn.marker()?.map(|m| m.height),
                operator_fee: txn.operator_fee()?,
                ..LedgerStats::default()
            };
            for (k, v) in txn.scan(keys::PARTICIPANT_PREFIX)? {
                let p: Participant = decode(&k, &v)?;
                stats.participants += 1;
                stats.total_staked += p.staked as u128;
                stats.total_unpaid += p.unpaid as u128;
            }
            for batch in txn.batches()? {
                match batch.status {
                    BatchStatus::Pending => stats.pending_batches += 1,
                    BatchStatus::Submitted => stats.submitted_batches += 1,
                    _ => {}
                }
                if batch.review_flagged {
                    stats.flagged_batches += 1;
                }
            }
            Ok(stats)
        })
    }

    // =========================================================================
    // Rewards
    // =========================================================================

    /// Credit a reward to one participant outside of a block commit.
    ///
    /// `at_height` must not be beyond the next unprocessed block.
    pub fn credit_reward(
        &self,
        participant: &ParticipantId,
        amount: Amount,
        at_height: BlockHeight,
    ) -> Result<(), LedgerError> {
        self.mutate("credit_reward", |txn| {
            if let Some(marker) = txn.marker()? {
                if at_height > marker.height + 1 {
                    return Err(LedgerError::HeightGap {
                        expected: marker.height + 1,
                        got: at_height,
                    });
                }
            }
            let mut p = txn.participant_or_new(participant)?;
            p.credit(amount)
                .ok_or_else(|| overflow("unpaid balance", participant))?;
            txn.put_participant(&p)?;
            debug!(
                "[csp-02] Credited {} to {} at height {}",
                amount, participant, at_height
            );
            Ok(())
        })
    }

    /// Apply one block: stake changes, reward credits, operator fee, event
    /// record, journal entry and marker advance, all in one batch.
    pub fn commit_block(&self, commit: BlockCommit) -> Result<ProcessedHeightMarker, LedgerError> {
        self.mutate("commit_block", |txn| {
            if let Some(marker) = txn.marker()? {
                if commit.height <= marker.height {
                    return Err(LedgerError::DuplicateEvent {
                        height: commit.height,
                        hash: commit.hash,
                    });
                }
                if commit.height != marker.height + 1 {
                    return Err(LedgerError::HeightGap {
                        expected: marker.height + 1,
                        got: commit.height,
                    });
                }
                if commit.prev_hash != marker.hash {
                    return Err(LedgerError::ChainReorg {
                        height: commit.height,
                        expected: marker.hash,
                        got: commit.prev_hash,
                    });
                }
            }

            let reward_total = match &commit.reward {
                Some(event) => {
                    if event.block_hash != commit.hash || event.height != commit.height {
                        return Err(LedgerError::InvalidCommit(format!(
                            "reward event for {} at {} attached to block {} at {}",
                            event.block_hash, event.height, commit.hash, commit.height
                        )));
                    }
                    if txn.get_raw(&keys::event(&event.block_hash))?.is_some() {
                        return Err(LedgerError::DuplicateEvent {
                            height: commit.height,
                            hash: commit.hash,
                        });
                    }
                    event.reward
                }
                None => 0,
            };

            let distributed: u128 = commit.credits.iter().map(|c| c.amount as u128).sum::<u128>()
                + commit.operator_fee as u128;
            if distributed != reward_total as u128 {
                return Err(LedgerError::InvalidCommit(format!(
                    "credits plus fee {} do not equal reward {} at height {}",
                    distributed, reward_total, commit.height
                )));
            }

            let mut effective_changes = Vec::with_capacity(commit.stake_changes.len());
            let mut touched: BTreeMap<ParticipantId, Amount> = BTreeMap::new();
            for change in &commit.stake_changes {
                let mut p = txn.participant_or_new(&change.participant)?;
                let amount = match change.kind {
                    StakeChangeKind::Deposit => change.amount,
                    StakeChangeKind::Withdrawal if change.amount > p.staked => {
                        warn!(
                            "[csp-02] Withdrawal of {} by {} exceeds stake {} at height {}, clamping",
                            change.amount, change.participant, p.staked, commit.height
                        );
                        p.staked
                    }
                    StakeChangeKind::Withdrawal => change.amount,
                };
                if amount == 0 {
                    continue;
                }
                let effective = StakeChange {
                    participant: change.participant.clone(),
                    kind: change.kind,
                    amount,
                };
                p.staked = effective
                    .apply_to(p.staked)
                    .ok_or_else(|| overflow("stake", &p.id))?;
                touched.insert(p.id.clone(), p.staked);
                txn.put_participant(&p)?;
                effective_changes.push(effective);
            }
            for (id, staked) in &touched {
                txn.put(keys::history(commit.height, id), staked)?;
            }

            let mut credits = Vec::with_capacity(commit.credits.len());
            for credit in commit.credits.iter().filter(|c| c.amount > 0) {
                let mut p = txn.participant_or_new(&credit.participant)?;
                p.credit(credit.amount)
                    .ok_or_else(|| overflow("unpaid balance", &p.id))?;
                txn.put_participant(&p)?;
                credits.push(Credit::new(credit.participant.clone(), credit.amount));
            }

            let fee = txn
                .operator_fee()?
                .checked_add(commit.operator_fee)
                .ok_or_else(|| LedgerError::InvalidCommit("operator fee overflows".to_string()))?;
            txn.put(keys::OPERATOR_FEE.to_vec(), &fee)?;

            if let Some(event) = &commit.reward {
                txn.put(keys::event(&event.block_hash), &commit.height)?;
            }

            let applied = AppliedBlock {
                height: commit.height,
                hash: commit.hash,
                prev_hash: commit.prev_hash,
                reward: commit.reward.clone(),
                credits,
                operator_fee: commit.operator_fee,
                stake_changes: effective_changes,
            };
            txn.put(keys::applied(commit.height), &applied)?;

            let marker = ProcessedHeightMarker::new(commit.height, commit.hash);
            txn.put(keys::MARKER.to_vec(), &marker)?;

            self.prune_journal(txn, commit.height)?;

            if reward_total > 0 {
                info!(
                    "[csp-02] Applied reward {} at height {} ({} credits, fee {})",
                    reward_total,
                    commit.height,
                    applied.credits.len(),
                    commit.operator_fee
                );
            }
            Ok(marker)
        })
    }

    /// Reverse every applied block above `height` and rewind the marker.
    ///
    /// Rewards that were already paid out are recorded as reward debt.
    pub fn rollback_to(&self, height: BlockHeight) -> Result<ProcessedHeightMarker, LedgerError> {
        self.mutate("rollback_to", |txn| {
            let marker = txn.marker()?.ok_or(LedgerError::InvalidRollback(height))?;
            if height > marker.height {
                return Err(LedgerError::InvalidRollback(height));
            }
            if height == marker.height {
                return Ok(marker);
            }

            let mut new_marker = marker;
            for h in (height + 1..=marker.height).rev() {
                let applied = txn.applied(h)?.ok_or(LedgerError::InvalidRollback(height))?;
                reverse_block(txn, &applied)?;
                new_marker = ProcessedHeightMarker::new(h - 1, applied.prev_hash);
            }
            txn.put(keys::MARKER.to_vec(), &new_marker)?;

            warn!(
                "[csp-02] Rolled back blocks {}..={}, marker now {} ({})",
                height + 1,
                marker.height,
                new_marker.height,
                new_marker.hash
            );
            Ok(new_marker)
        })
    }

    /// Drop journal entries that fell out of the retention window.
    ///
    /// A pruned block's stake history rows fold into the height-0 baseline
    /// and its reward event key goes away; any replay of that block is
    /// already refused by the marker check.
    fn prune_journal(&self, txn: &mut Txn<'_>, height: BlockHeight) -> Result<(), LedgerError> {
        let mut floor: BlockHeight = txn.get(keys::JOURNAL_FLOOR)?.unwrap_or(height);
        let horizon = match height.checked_sub(self.journal_depth) {
            Some(horizon) => horizon,
            None => {
                txn.put(keys::JOURNAL_FLOOR.to_vec(), &floor)?;
                return Ok(());
            }
        };

        let first = floor;
        while floor <= horizon {
            if let Some(applied) = txn.applied(floor)? {
                let mut folded = HashSet::new();
                for change in &applied.stake_changes {
                    if !folded.insert(change.participant.clone()) {
                        continue;
                    }
                    let row = keys::history(floor, &change.participant);
                    let Some(stake) = txn.get::<Amount>(&row)? else {
                        continue;
                    };
                    txn.delete(row);
                    let baseline = keys::history(0, &change.participant);
                    if stake == 0 {
                        txn.delete(baseline);
                    } else {
                        txn.put(baseline, &stake)?;
                    }
                }
                if let Some(event) = &applied.reward {
                    txn.delete(keys::event(&event.block_hash));
                }
                txn.delete(keys::applied(floor));
            }
            floor += 1;
        }
        if floor > first {
            debug!(
                "[csp-02] Pruned journal blocks {}..{} (depth {})",
                first, floor, self.journal_depth
            );
        }
        txn.put(keys::JOURNAL_FLOOR.to_vec(), &floor)?;
        Ok(())
    }

    // =========================================================================
    // Payouts
    // =========================================================================

    /// Debit every entry and record a `Pending` batch, atomically.
    pub fn debit_for_payout(
        &self,
        entries: Vec<PayoutEntry>,
        at_height: BlockHeight,
    ) -> Result<PayoutBatch, LedgerError> {
        self.mutate("debit_for_payout", |txn| {
            if entries.is_empty() {
                return Err(LedgerError::InvalidCommit("empty payout batch".to_string()));
            }
            let mut seen = HashSet::new();
            let mut debited = Vec::with_capacity(entries.len());
            for entry in entries {
                if !seen.insert(entry.participant.clone()) {
                    return Err(LedgerError::InvalidCommit(format!(
                        "{} appears twice in one batch",
                        entry.participant
                    )));
                }
                if entry.amount == 0 {
                    return Err(LedgerError::InvalidCommit(format!(
                        "zero payout to {}",
                        entry.participant
                    )));
                }
                let mut p = txn
                    .participant(&entry.participant)?
                    .ok_or_else(|| LedgerError::UnknownParticipant(entry.participant.clone()))?;
                if p.unpaid < entry.amount {
                    return Err(LedgerError::InsufficientBalance {
                        participant: p.id,
                        requested: entry.amount,
                        available: p.unpaid,
                    });
                }
                let prior_payout_height = p.last_payout_height;
                p.unpaid -= entry.amount;
                p.total_paid = p
                    .total_paid
                    .checked_add(entry.amount)
                    .ok_or_else(|| overflow("total paid", &p.id))?;
                p.last_payout_height = Some(at_height);
                txn.put_participant(&p)?;
                debited.push(PayoutEntry {
                    participant: entry.participant,
                    amount: entry.amount,
                    prior_payout_height,
                });
            }

            let id: u64 = txn.get(keys::BATCH_SEQ)?.unwrap_or(1);
            txn.put(keys::BATCH_SEQ.to_vec(), &(id + 1))?;

            let batch = PayoutBatch {
                id,
                entries: debited,
                status: BatchStatus::Pending,
                created_height: at_height,
                txid: None,
                submitted_height: None,
                review_flagged: false,
                note: None,
            };
            txn.put(keys::batch(id), &batch)?;

            info!(
                "[csp-02] Debited batch {} ({} outputs, total {}) at height {}",
                id,
                batch.entries.len(),
                batch.total(),
                at_height
            );
            Ok(batch)
        })
    }

    /// Record the node's acceptance of a batch.
    pub fn mark_submitted(
        &self,
        id: u64,
        txid: TxId,
        at_height: BlockHeight,
    ) -> Result<PayoutBatch, LedgerError> {
        self.mutate("mark_submitted", |txn| {
            let mut batch = txn.batch(id)?;
            let status = batch.status;
            match status {
                BatchStatus::Pending => {}
                BatchStatus::Submitted if batch.txid.as_ref() == Some(&txid) => return Ok(batch),
                from => {
                    return Err(LedgerError::InvalidBatchTransition {
                        id,
                        from,
                        to: BatchStatus::Submitted,
                    })
                }
            }
            batch.status = BatchStatus::Submitted;
            batch.txid = Some(txid);
            batch.submitted_height = Some(at_height);
            txn.put(keys::batch(id), &batch)?;
            Ok(batch)
        })
    }

    /// Record that a submitted batch is buried deep enough.
    pub fn mark_confirmed(&self, id: u64) -> Result<PayoutBatch, LedgerError> {
        self.mutate("mark_confirmed", |txn| {
            let mut batch = txn.batch(id)?;
            let status = batch.status;
            match status {
                BatchStatus::Submitted => {}
                BatchStatus::Confirmed => return Ok(batch),
                from => {
                    return Err(LedgerError::InvalidBatchTransition {
                        id,
                        from,
                        to: BatchStatus::Confirmed,
                    })
                }
            }
            batch.status = BatchStatus::Confirmed;
            txn.put(keys::batch(id), &batch)?;
            info!("[csp-02] Batch {} confirmed", id);
            Ok(batch)
        })
    }

    /// Undo a batch's debit and mark it `Failed`.
    ///
    /// Each entry is credited back; a participant's last payout height is
    /// restored unless a later batch has paid them since.
    pub fn revert_batch(&self, id: u64, reason: &str) -> Result<PayoutBatch, LedgerError> {
        self.mutate("revert_batch", |txn| {
            let mut batch = txn.batch(id)?;
            if batch.status.is_terminal() {
                return Err(LedgerError::InvalidBatchTransition {
                    id,
                    from: batch.status,
                    to: BatchStatus::Failed,
                });
            }
            for entry in &batch.entries {
                let mut p = txn.participant_or_new(&entry.participant)?;
                p.credit(entry.amount)
                    .ok_or_else(|| overflow("unpaid balance", &p.id))?;
                p.total_paid = p.total_paid.checked_sub(entry.amount).ok_or_else(|| {
                    LedgerError::CorruptLedgerState(format!(
                        "total paid of {} below reverted amount in batch {}",
                        p.id, id
                    ))
                })?;
                if p.last_payout_height == Some(batch.created_height) {
                    p.last_payout_height = entry.prior_payout_height;
                }
                txn.put_participant(&p)?;
            }
            batch.status = BatchStatus::Failed;
            batch.note = Some(reason.to_string());
            txn.put(keys::batch(id), &batch)?;
            warn!(
                "[csp-02] Reverted batch {} ({} outputs, total {}): {}",
                id,
                batch.entries.len(),
                batch.total(),
                reason
            );
            Ok(batch)
        })
    }

    /// Mark a batch for operator attention.
    pub fn flag_for_review(&self, id: u64, reason: &str) -> Result<PayoutBatch, LedgerError> {
        self.mutate("flag_for_review", |txn| {
            let mut batch = txn.batch(id)?;
            if batch.review_flagged {
                return Ok(batch);
            }
            batch.review_flagged = true;
            batch.note = Some(reason.to_string());
            txn.put(keys::batch(id), &batch)?;
            error!("[csp-02] Batch {} flagged for operator review: {}", id, reason);
            Ok(batch)
        })
    }

    // =========================================================================
    // Integrity
    // =========================================================================

    /// Decode every record and check cross-record consistency.
    ///
    /// On failure the ledger is halted and `CorruptLedgerState` returned.
    pub fn verify_integrity(&self) -> Result<LedgerStats, LedgerError> {
        self.read(check_integrity)?;
        let stats = self.stats()?;
        debug!("[csp-02] Integrity check passed: {:?}", stats);
        Ok(stats)
    }
}

fn reverse_block(txn: &mut Txn<'_>, applied: &AppliedBlock) -> Result<(), LedgerError> {
    let corrupt = |what: String| LedgerError::CorruptLedgerState(what);

    for credit in &applied.credits {
        let mut p = txn.participant_or_new(&credit.participant)?;
        let debt_before = p.reward_debt;
        p.reverse_credit(credit.amount)
            .ok_or_else(|| overflow("reward debt", &p.id))?;
        if p.reward_debt > debt_before {
            warn!(
                "[csp-02] {} was already paid {} of the reversed reward at height {}, recorded as debt",
                p.id,
                p.reward_debt - debt_before,
                applied.height
            );
        }
        txn.put_participant(&p)?;
    }

    let fee = txn
        .operator_fee()?
        .checked_sub(applied.operator_fee)
        .ok_or_else(|| corrupt(format!("operator fee below journal at {}", applied.height)))?;
    txn.put(keys::OPERATOR_FEE.to_vec(), &fee)?;

    let mut touched = HashSet::new();
    for change in applied.stake_changes.iter().rev() {
        let mut p = txn.participant_or_new(&change.participant)?;
        p.staked = change.revert_from(p.staked).ok_or_else(|| {
            corrupt(format!(
                "stake of {} cannot revert {:?} of {} at {}",
                p.id, change.kind, change.amount, applied.height
            ))
        })?;
        txn.put_participant(&p)?;
        touched.insert(p.id.clone());
    }
    for id in touched {
        txn.delete(keys::history(applied.height, &id));
    }

    if let Some(event) = &applied.reward {
        txn.delete(keys::event(&event.block_hash));
    }
    txn.delete(keys::applied(applied.height));
    Ok(())
}

fn check_integrity(txn: &Txn<'_>) -> Result<(), LedgerError> {
    let corrupt = |what: String| Err(LedgerError::CorruptLedgerState(what));

    let marker = txn.marker()?;
    txn.operator_fee()?;
    let next_batch: u64 = txn.get(keys::BATCH_SEQ)?.unwrap_or(1);

    // An empty journal with a marker is the state after rolling back past
    // the first applied block.
    let mut journal_top = None;
    for (k, v) in txn.scan(keys::APPLIED_PREFIX)? {
        let applied: AppliedBlock = decode(&k, &v)?;
        if k != keys::applied(applied.height) {
            return corrupt(format!("journal entry stored under wrong key for {}", applied.height));
        }
        journal_top = Some(applied);
    }
    match (&marker, &journal_top) {
        (Some(m), Some(top)) if top.height != m.height || top.hash != m.hash => {
            return corrupt(format!(
                "marker {} ({}) does not match journal top {} ({})",
                m.height, m.hash, top.height, top.hash
            ));
        }
        (None, Some(top)) => {
            return corrupt(format!("journal entry {} without marker", top.height));
        }
        _ => {}
    }

    for (k, v) in txn.scan(keys::EVENT_PREFIX)? {
        let height: BlockHeight = decode(&k, &v)?;
        if marker.map_or(true, |m| height > m.height) {
            return corrupt(format!("reward event recorded above marker at {}", height));
        }
    }

    let mut latest_stake: BTreeMap<ParticipantId, Amount> = BTreeMap::new();
    for (k, v) in txn.scan(keys::HISTORY_PREFIX)? {
        let (height, id) = keys::parse_history(&k)
            .ok_or_else(|| LedgerError::CorruptLedgerState("malformed history key".to_string()))?;
        if marker.map_or(true, |m| height > m.height) {
            return corrupt(format!("stake history for {} above marker at {}", id, height));
        }
        let stake: Amount = decode(&k, &v)?;
        latest_stake.insert(id, stake);
    }

    for (k, v) in txn.scan(keys::PARTICIPANT_PREFIX)? {
        let p: Participant = decode(&k, &v)?;
        if k != keys::participant(&p.id) {
            return corrupt(format!("participant {} stored under wrong key", p.id));
        }
        let expected = latest_stake.get(&p.id).copied().unwrap_or(0);
        if p.staked != expected {
            return corrupt(format!(
                "stake of {} is {} but history says {}",
                p.id, p.staked, expected
            ));
        }
    }

    for batch in txn.batches()? {
        if batch.id >= next_batch {
            return corrupt(format!("batch {} beyond sequence {}", batch.id, next_batch));
        }
        if batch.status == BatchStatus::Submitted && batch.txid.is_none() {
            return corrupt(format!("submitted batch {} has no txid", batch.id));
        }
    }
    Ok(())
}
