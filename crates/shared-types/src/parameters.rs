//! Height-indexed pool parameters.
//!
//! The pool settings carry a list of parameter sets, each effective from a
//! block height. The set with the greatest `height <= h` applies at `h`.

use crate::entities::{Amount, BlockHeight, COIN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// One parameter set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParameters {
    /// First height this set applies to.
    pub height: BlockHeight,
    /// Pool fee, in basis points of each reward.
    pub pool_fee_bps: u32,
    /// Bonus for the kernel staker, in basis points of each reward.
    pub stake_bonus_bps: u32,
    /// Minimum unpaid balance before a participant is paid.
    pub payout_threshold: Amount,
    /// Minimum blocks between two payouts to the same participant.
    pub min_blocks_between_payments: u64,
    /// Outputs smaller than this are never emitted.
    pub min_output_value: Amount,
}

impl Default for PoolParameters {
    fn default() -> Self {
        Self {
            height: 0,
            pool_fee_bps: 300,
            stake_bonus_bps: 500,
            payout_threshold: COIN / 2,
            min_blocks_between_payments: 100,
            min_output_value: COIN / 10,
        }
    }
}

/// Invalid parameter schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("Parameter schedule is empty")]
    Empty,

    #[error("Duplicate parameter height {0}")]
    DuplicateHeight(BlockHeight),

    #[error("Fee ({fee_bps} bps) plus stake bonus ({bonus_bps} bps) exceed 100% at height {height}")]
    FeesExceedReward {
        height: BlockHeight,
        fee_bps: u32,
        bonus_bps: u32,
    },
}

/// Parameter sets ordered by activation height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterSchedule {
    entries: Vec<PoolParameters>,
}

impl ParameterSchedule {
    /// Validate and sort a list of parameter sets.
    pub fn new(mut entries: Vec<PoolParameters>) -> Result<Self, ParameterError> {
        if entries.is_empty() {
            return Err(ParameterError::Empty);
        }
        entries.sort_by_key(|p| p.height);
        for pair in entries.windows(2) {
            if pair[0].height == pair[1].height {
                return Err(ParameterError::DuplicateHeight(pair[0].height));
            }
        }
        for p in &entries {
            if p.pool_fee_bps as u64 + p.stake_bonus_bps as u64 > BPS_DENOMINATOR as u64 {
                return Err(ParameterError::FeesExceedReward {
                    height: p.height,
                    fee_bps: p.pool_fee_bps,
                    bonus_bps: p.stake_bonus_bps,
                });
            }
        }
        Ok(Self { entries })
    }

    /// Schedule with one set for every height.
    pub fn single(params: PoolParameters) -> Self {
        Self {
            entries: vec![PoolParameters { height: 0, ..params }],
        }
    }

    /// Parameters in force at `height`. Heights before the first entry use
    /// the first entry.
    pub fn at(&self, height: BlockHeight) -> &PoolParameters {
        let idx = self.entries.partition_point(|p| p.height <= height);
        &self.entries[idx.saturating_sub(1)]
    }

    /// All entries, ordered by height.
    pub fn entries(&self) -> &[PoolParameters] {
        &self.entries
    }
}

impl Default for ParameterSchedule {
    fn default() -> Self {
        Self::single(PoolParameters::default())
    }
}
