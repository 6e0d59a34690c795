//! # Core Domain Entities
//!
//! Amounts, identifiers and chain data shared across the pool subsystems.
//!
//! Block hashes are kept in the byte order of the node's RPC hex strings, so
//! `BlockHash::from_hex(h).to_hex() == h` for anything the node reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in minor units (1 coin = [`COIN`] units).
pub type Amount = u64;

/// Block height on the node's best chain.
pub type BlockHeight = u64;

/// Minor units per whole coin.
pub const COIN: Amount = 100_000_000;

/// Convert a coin amount as carried by JSON (settings, node RPC) to minor
/// units, rounding to the nearest unit.
///
/// `None` for negative, non-finite or out-of-range values.
pub fn coins_to_amount(coins: f64) -> Option<Amount> {
    if !coins.is_finite() || coins < 0.0 {
        return None;
    }
    let units = (coins * COIN as f64).round();
    if units > u64::MAX as f64 {
        return None;
    }
    Some(units as Amount)
}

/// Render minor units as a decimal coin amount with eight places.
pub fn format_coins(amount: Amount) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}

/// A 32-byte block hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// All-zero hash, used as the parent of the first tracked block.
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    /// Parse a 64-character hex string as reported by the node.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Hex form, identical to the node's RPC representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "BlockHash({}..)", &self.to_hex()[..12])
    }
}

/// Participant identifier: the spend address owning a cold-staked output.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The underlying address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Transaction id of a submitted payout.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(String);

impl TxId {
    /// Wrap a txid string.
    pub fn new(txid: impl Into<String>) -> Self {
        Self(txid.into())
    }

    /// The txid as reported by the node.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

/// Direction of a stake change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeChangeKind {
    /// Coins moved into a cold-stake output controlled by the pool.
    Deposit,
    /// A pool cold-stake output was spent by its owner.
    Withdrawal,
}

/// A deposit or withdrawal confirmed in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeChange {
    /// Owner of the stake.
    pub participant: ParticipantId,
    /// Deposit or withdrawal.
    pub kind: StakeChangeKind,
    /// Amount moved.
    pub amount: Amount,
}

impl StakeChange {
    /// Create a deposit.
    pub fn deposit(participant: impl Into<ParticipantId>, amount: Amount) -> Self {
        Self {
            participant: participant.into(),
            kind: StakeChangeKind::Deposit,
            amount,
        }
    }

    /// Create a withdrawal.
    pub fn withdrawal(participant: impl Into<ParticipantId>, amount: Amount) -> Self {
        Self {
            participant: participant.into(),
            kind: StakeChangeKind::Withdrawal,
            amount,
        }
    }

    /// Apply this change to a balance.
    ///
    /// Returns `None` when a withdrawal exceeds the balance or a deposit
    /// overflows.
    pub fn apply_to(&self, balance: Amount) -> Option<Amount> {
        match self.kind {
            StakeChangeKind::Deposit => balance.checked_add(self.amount),
            StakeChangeKind::Withdrawal => balance.checked_sub(self.amount),
        }
    }

    /// Undo this change on a balance (used by reorg rollback).
    pub fn revert_from(&self, balance: Amount) -> Option<Amount> {
        match self.kind {
            StakeChangeKind::Deposit => balance.checked_sub(self.amount),
            StakeChangeKind::Withdrawal => balance.checked_add(self.amount),
        }
    }
}

impl From<&String> for ParticipantId {
    fn from(s: &String) -> Self {
        Self::new(s.clone())
    }
}

/// A block won by the pool's aggregated stake.
///
/// Immutable once observed and uniquely keyed by `block_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRewardEvent {
    /// Height of the staked block.
    pub height: BlockHeight,
    /// Hash of the staked block.
    pub block_hash: BlockHash,
    /// Total reward earned by the pool for this block.
    pub reward: Amount,
    /// Block timestamp (unix seconds).
    pub timestamp: u64,
    /// Owner of the kernel output that staked the block, when known.
    pub staker: Option<ParticipantId>,
}

/// A block as observed on the node's best chain, reduced to what the pool
/// needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    /// Block height.
    pub height: BlockHeight,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent block hash.
    pub prev_hash: BlockHash,
    /// Block timestamp (unix seconds).
    pub timestamp: u64,
    /// Stake reward earned by the pool, if the pool staked this block.
    pub reward: Option<Amount>,
    /// Kernel owner when the pool staked this block.
    pub staker: Option<ParticipantId>,
    /// Pool deposits and withdrawals confirmed in this block.
    pub stake_changes: Vec<StakeChange>,
}

impl ChainBlock {
    /// A block carrying no pool activity.
    pub fn empty(height: BlockHeight, hash: BlockHash, prev_hash: BlockHash, timestamp: u64) -> Self {
        Self {
            height,
            hash,
            prev_hash,
            timestamp,
            reward: None,
            staker: None,
            stake_changes: Vec::new(),
        }
    }

    /// The stake-reward event carried by this block, if any.
    pub fn reward_event(&self) -> Option<StakeRewardEvent> {
        self.reward.filter(|r| *r > 0).map(|reward| StakeRewardEvent {
            height: self.height,
            block_hash: self.hash,
            reward,
            timestamp: self.timestamp,
            staker: self.staker.clone(),
        })
    }
}

/// Best-chain tip reported by the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Tip height.
    pub height: BlockHeight,
    /// Tip hash.
    pub hash: BlockHash,
}

/// Highest block whose effects are fully applied to the ledger.
///
/// This is the single source of truth for resuming after a restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedHeightMarker {
    /// Height of the last applied block.
    pub height: BlockHeight,
    /// Hash of the last applied block.
    pub hash: BlockHash,
}

impl ProcessedHeightMarker {
    /// Create a marker.
    pub fn new(height: BlockHeight, hash: BlockHash) -> Self {
        Self { height, hash }
    }

    /// Next height to process given an optional marker and the configured
    /// start height.
    pub fn next_height(marker: Option<&Self>, start_height: BlockHeight) -> BlockHeight {
        marker
            .map(|m| m.height + 1)
            .unwrap_or(start_height)
            .max(start_height)
    }
}
