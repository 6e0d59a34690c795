//! # Domain Entities
//!
//! Participants, payout batches, snapshots and the applied-block journal.

use serde::{Deserialize, Serialize};
use shared_types::{
    Amount, BlockHash, BlockHeight, ParticipantId, StakeChange, StakeRewardEvent, TxId,
};
use std::collections::BTreeMap;

/// A pool participant.
///
/// `unpaid` only grows through reward credits until a payout debits it. A
/// reorg reversal is the one other decrement; whatever cannot be taken back
/// from `unpaid` is carried as `reward_debt` and netted against future
/// credits, so `unpaid - reward_debt` always moves by exactly the reversed
/// amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Spend address.
    pub id: ParticipantId,
    /// Currently staked balance.
    pub staked: Amount,
    /// Accrued, not yet paid rewards.
    pub unpaid: Amount,
    /// Height of the last payout debit.
    pub last_payout_height: Option<BlockHeight>,
    /// Total ever debited for payouts (net of reverted batches).
    pub total_paid: Amount,
    /// Rewards reversed by a reorg after they were paid out.
    pub reward_debt: Amount,
}

impl Participant {
    /// A participant with no stake and no rewards.
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            staked: 0,
            unpaid: 0,
            last_payout_height: None,
            total_paid: 0,
            reward_debt: 0,
        }
    }

    /// Credit a reward, settling any outstanding reward debt first.
    pub fn credit(&mut self, amount: Amount) -> Option<()> {
        let settled = amount.min(self.reward_debt);
        self.reward_debt -= settled;
        self.unpaid = self.unpaid.checked_add(amount - settled)?;
        Some(())
    }

    /// Reverse a previous credit.
    pub fn reverse_credit(&mut self, amount: Amount) -> Option<()> {
        let from_unpaid = amount.min(self.unpaid);
        self.unpaid -= from_unpaid;
        self.reward_debt = self.reward_debt.checked_add(amount - from_unpaid)?;
        Some(())
    }
}

/// A single reward credit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    /// Credited participant.
    pub participant: ParticipantId,
    /// Credited amount.
    pub amount: Amount,
}

impl Credit {
    /// Create a credit.
    pub fn new(participant: ParticipantId, amount: Amount) -> Self {
        Self { participant, amount }
    }
}

/// Everything one block changes in the ledger, committed atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockCommit {
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent hash; must match the current marker.
    pub prev_hash: BlockHash,
    /// Deposits and withdrawals confirmed in the block.
    pub stake_changes: Vec<StakeChange>,
    /// Reward event, when the pool staked this block.
    pub reward: Option<StakeRewardEvent>,
    /// Participant credits for the reward.
    pub credits: Vec<Credit>,
    /// Operator fee (pool fee plus rounding remainder).
    pub operator_fee: Amount,
}

impl BlockCommit {
    /// A commit with no reward.
    pub fn without_reward(
        height: BlockHeight,
        hash: BlockHash,
        prev_hash: BlockHash,
        stake_changes: Vec<StakeChange>,
    ) -> Self {
        Self {
            height,
            hash,
            prev_hash,
            stake_changes,
            reward: None,
            credits: Vec::new(),
            operator_fee: 0,
        }
    }
}

/// Journal entry for a committed block, enough to reverse it exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedBlock {
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent hash.
    pub prev_hash: BlockHash,
    /// Reward event applied with this block.
    pub reward: Option<StakeRewardEvent>,
    /// Credits applied.
    pub credits: Vec<Credit>,
    /// Operator fee applied.
    pub operator_fee: Amount,
    /// Stake changes as actually applied (withdrawals clamped to balance).
    pub stake_changes: Vec<StakeChange>,
}

/// Stake balances as of a block height.
///
/// Reflects stake changes confirmed strictly before `height`. Ordered by
/// participant id so allocation is deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
    /// Height the snapshot describes.
    pub height: BlockHeight,
    /// Non-zero stakes by participant.
    pub stakes: BTreeMap<ParticipantId, Amount>,
}

impl LedgerSnapshot {
    /// Build a snapshot from explicit stakes (zero stakes are dropped).
    pub fn new(height: BlockHeight, stakes: impl IntoIterator<Item = (ParticipantId, Amount)>) -> Self {
        Self {
            height,
            stakes: stakes.into_iter().filter(|(_, s)| *s > 0).collect(),
        }
    }

    /// Sum of all stakes.
    pub fn total_stake(&self) -> u128 {
        self.stakes.values().map(|s| *s as u128).sum()
    }

    /// Stake of one participant.
    pub fn stake_of(&self, id: &ParticipantId) -> Amount {
        self.stakes.get(id).copied().unwrap_or(0)
    }

    /// Whether nobody is staking.
    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }
}

/// Payout batch status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Ledger debited, transaction not yet known to be submitted.
    Pending,
    /// Transaction accepted by the node.
    Submitted,
    /// Transaction has enough confirmations.
    Confirmed,
    /// Submission failed; debit reverted.
    Failed,
}

impl BatchStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Confirmed | BatchStatus::Failed)
    }
}

/// One output of a payout batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutEntry {
    /// Paid participant (the output address).
    pub participant: ParticipantId,
    /// Paid amount.
    pub amount: Amount,
    /// Participant's last payout height before this debit.
    pub prior_payout_height: Option<BlockHeight>,
}

impl PayoutEntry {
    /// Create an entry; the prior payout height is filled in by the ledger.
    pub fn new(participant: ParticipantId, amount: Amount) -> Self {
        Self {
            participant,
            amount,
            prior_payout_height: None,
        }
    }
}

/// A group of payouts sent as one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBatch {
    /// Monotonic batch id.
    pub id: u64,
    /// Outputs.
    pub entries: Vec<PayoutEntry>,
    /// Current status.
    pub status: BatchStatus,
    /// Height at which the ledger was debited.
    pub created_height: BlockHeight,
    /// Transaction id once submitted.
    pub txid: Option<TxId>,
    /// Height at which the node accepted the transaction.
    pub submitted_height: Option<BlockHeight>,
    /// Set when an operator must look at this batch.
    pub review_flagged: bool,
    /// Why the batch failed or was flagged.
    pub note: Option<String>,
}

impl PayoutBatch {
    /// Sum of all outputs.
    pub fn total(&self) -> Amount {
        self.entries.iter().map(|e| e.amount).sum()
    }

    /// Comment attached to the payout transaction; lets recovery find a
    /// transaction whose submission outcome was lost.
    pub fn comment(&self) -> String {
        Self::comment_for(self.id)
    }

    /// Comment for the batch with `id`.
    pub fn comment_for(id: u64) -> String {
        format!("csp-batch-{}", id)
    }

    /// Parse a batch id back out of a transaction comment.
    pub fn id_from_comment(comment: &str) -> Option<u64> {
        comment.strip_prefix("csp-batch-")?.parse().ok()
    }
}

/// Aggregate figures for the status document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Last applied block.
    pub marker_height: Option<BlockHeight>,
    /// Participants with a record.
    pub participants: usize,
    /// Sum of staked balances.
    pub total_staked: u128,
    /// Sum of unpaid rewards.
    pub total_unpaid: u128,
    /// Operator fee balance.
    pub operator_fee: Amount,
    /// Batches by status.
    pub pending_batches: usize,
    /// Batches submitted but unconfirmed.
    pub submitted_batches: usize,
    /// Batches flagged for review.
    pub flagged_batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ParticipantId {
        ParticipantId::new("alice")
    }

    #[test]
    fn test_credit_settles_debt_first() {
        let mut p = Participant::new(alice());
        p.reward_debt = 30;
        p.credit(50).unwrap();
        assert_eq!(p.reward_debt, 0);
        assert_eq!(p.unpaid, 20);
    }

    #[test]
    fn test_reverse_credit_overflows_into_debt() {
        let mut p = Participant::new(alice());
        p.unpaid = 10;
        p.reverse_credit(25).unwrap();
        assert_eq!(p.unpaid, 0);
        assert_eq!(p.reward_debt, 15);
    }

    #[test]
    fn test_credit_and_reverse_keep_net_balance() {
        let mut p = Participant::new(alice());
        p.unpaid = 7;
        p.reward_debt = 3;
        let net_before = p.unpaid as i128 - p.reward_debt as i128;
        p.credit(11).unwrap();
        p.reverse_credit(11).unwrap();
        assert_eq!(p.unpaid as i128 - p.reward_debt as i128, net_before);
    }

    #[test]
    fn test_snapshot_drops_zero_stakes() {
        let snapshot = LedgerSnapshot::new(
            10,
            vec![(alice(), 100), (ParticipantId::new("bob"), 0)],
        );
        assert_eq!(snapshot.stakes.len(), 1);
        assert_eq!(snapshot.total_stake(), 100);
        assert_eq!(snapshot.stake_of(&ParticipantId::new("bob")), 0);
    }

    #[test]
    fn test_batch_comment_roundtrip() {
        let batch = PayoutBatch {
            id: 17,
            entries: vec![],
            status: BatchStatus::Pending,
            created_height: 1,
            txid: None,
            submitted_height: None,
            review_flagged: false,
            note: None,
        };
        assert_eq!(PayoutBatch::id_from_comment(&batch.comment()), Some(17));
        assert_eq!(PayoutBatch::id_from_comment("something else"), None);
    }
}
