//! # Reward Allocation
//!
//! Pure split of one stake reward across the participants of a snapshot.
//!
//! ## Algorithm
//!
//! 1. Pool fee: `floor(reward * fee_bps / 10_000)`.
//! 2. Stake bonus: `floor(reward * bonus_bps / 10_000)`, credited to the
//!    kernel staker when it holds stake in the snapshot. Otherwise it stays
//!    in the distributable pot.
//! 3. Each participant gets `floor(distributable * stake / total_stake)`,
//!    computed in `u128`.
//! 4. The truncation remainder goes to the operator fee.
//!
//! `sum(credits) + operator_fee == reward` always holds exactly.

use csp_02_participant_ledger::{Credit, LedgerSnapshot};
use shared_types::{Amount, PoolParameters, StakeRewardEvent, BPS_DENOMINATOR};
use std::collections::BTreeMap;

/// Fee settings applied to one reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FeePolicy {
    /// Pool fee in basis points.
    pub pool_fee_bps: u32,
    /// Kernel staker bonus in basis points.
    pub stake_bonus_bps: u32,
}

impl FeePolicy {
    /// Policy from whole percentages.
    pub fn from_percent(pool_fee_percent: u32, stake_bonus_percent: u32) -> Self {
        Self {
            pool_fee_bps: pool_fee_percent * 100,
            stake_bonus_bps: stake_bonus_percent * 100,
        }
    }

    fn portion(reward: Amount, bps: u32) -> Amount {
        let bps = bps.min(BPS_DENOMINATOR) as u128;
        (reward as u128 * bps / BPS_DENOMINATOR as u128) as Amount
    }
}

impl From<&PoolParameters> for FeePolicy {
    fn from(params: &PoolParameters) -> Self {
        Self {
            pool_fee_bps: params.pool_fee_bps,
            stake_bonus_bps: params.stake_bonus_bps,
        }
    }
}

/// Result of splitting one reward.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Allocation {
    /// One credit per rewarded participant, ordered by id.
    pub credits: Vec<Credit>,
    /// Pool fee plus rounding remainder.
    pub operator_fee: Amount,
    /// Pool fee part of `operator_fee`.
    pub pool_fee: Amount,
    /// Bonus paid to the kernel staker (included in `credits`).
    pub stake_bonus: Amount,
    /// Truncation dust part of `operator_fee`.
    pub remainder: Amount,
}

impl Allocation {
    /// Sum of all participant credits.
    pub fn credited(&self) -> u128 {
        self.credits.iter().map(|c| c.amount as u128).sum()
    }

    /// Credit of one participant.
    pub fn credit_of(&self, id: &str) -> Amount {
        self.credits
            .iter()
            .find(|c| c.participant.as_str() == id)
            .map_or(0, |c| c.amount)
    }
}

/// Split `event.reward` across `snapshot`.
pub fn allocate(event: &StakeRewardEvent, snapshot: &LedgerSnapshot, policy: FeePolicy) -> Allocation {
    let reward = event.reward;
    let total_stake = snapshot.total_stake();

    if total_stake == 0 {
        return Allocation {
            credits: Vec::new(),
            operator_fee: reward,
            pool_fee: reward,
            stake_bonus: 0,
            remainder: 0,
        };
    }

    let pool_fee = FeePolicy::portion(reward, policy.pool_fee_bps);
    let bonus_target = event
        .staker
        .as_ref()
        .filter(|staker| snapshot.stake_of(staker) > 0);
    let stake_bonus = match bonus_target {
        Some(_) => FeePolicy::portion(reward, policy.stake_bonus_bps).min(reward - pool_fee),
        None => 0,
    };
    let distributable = reward - pool_fee - stake_bonus;

    let mut credits: BTreeMap<_, Amount> = BTreeMap::new();
    let mut distributed: Amount = 0;
    for (id, stake) in &snapshot.stakes {
        let share = (distributable as u128 * *stake as u128 / total_stake) as Amount;
        if share > 0 {
            credits.insert(id.clone(), share);
            distributed += share;
        }
    }
    if let Some(staker) = bonus_target {
        if stake_bonus > 0 {
            *credits.entry(staker.clone()).or_insert(0) += stake_bonus;
        }
    }

    let remainder = distributable - distributed;
    Allocation {
        credits: credits
            .into_iter()
            .map(|(participant, amount)| Credit::new(participant, amount))
            .collect(),
        operator_fee: pool_fee + remainder,
        pool_fee,
        stake_bonus,
        remainder,
    }
}
