//! Reward allocation through the watcher and the ledger.

use super::fixtures::{no_fees, Pool};
use csp_03_reward_allocator::ApplyOutcome;
use shared_types::{ParameterSchedule, PoolParameters, StakeChange, COIN};

#[tokio::test]
async fn test_reward_split_leaves_remainder_to_operator() {
    let mut pool = Pool::new(no_fees());
    pool.chain.push_block(
        None,
        None,
        vec![
            StakeChange::deposit("alice", 100),
            StakeChange::deposit("bob", 200),
            StakeChange::deposit("carol", 300),
        ],
    );
    pool.chain.push_block(Some(601), None, vec![]);

    assert_eq!(pool.sync().await, 2);

    assert_eq!(pool.unpaid("alice"), 100);
    assert_eq!(pool.unpaid("bob"), 200);
    assert_eq!(pool.unpaid("carol"), 300);
    assert_eq!(pool.operator_fee(), 1);
}

#[tokio::test]
async fn test_fee_and_stake_bonus() {
    let mut pool = Pool::new(ParameterSchedule::default());
    pool.chain.push_block(
        None,
        None,
        vec![StakeChange::deposit("alice", COIN), StakeChange::deposit("bob", COIN)],
    );
    pool.chain.push_block(Some(COIN), Some("bob"), vec![]);
    pool.sync().await;

    // 3% fee, 5% bonus to bob, the rest split evenly.
    assert_eq!(pool.operator_fee(), 3_000_000);
    assert_eq!(pool.unpaid("alice"), 46_000_000);
    assert_eq!(pool.unpaid("bob"), 51_000_000);
}

#[tokio::test]
async fn test_parameters_follow_height() {
    let schedule = ParameterSchedule::new(vec![
        PoolParameters {
            height: 0,
            pool_fee_bps: 0,
            stake_bonus_bps: 0,
            ..PoolParameters::default()
        },
        PoolParameters {
            height: 4,
            pool_fee_bps: 1_000,
            stake_bonus_bps: 0,
            ..PoolParameters::default()
        },
    ])
    .unwrap();
    let mut pool = Pool::new(schedule);
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    pool.chain.push_block(Some(1_000), None, vec![]);
    pool.chain.push_empty(1);
    pool.chain.push_block(Some(1_000), None, vec![]);
    pool.sync().await;

    assert_eq!(pool.unpaid("alice"), 1_900);
    assert_eq!(pool.operator_fee(), 100);
}

#[tokio::test]
async fn test_stake_changes_apply_from_next_block() {
    let mut pool = Pool::new(no_fees());
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    // Bob joins in the rewarded block itself and gets nothing for it.
    pool.chain
        .push_block(Some(1_000), None, vec![StakeChange::deposit("bob", COIN)]);
    pool.chain.push_block(Some(1_000), None, vec![]);
    pool.sync().await;

    assert_eq!(pool.unpaid("alice"), 1_500);
    assert_eq!(pool.unpaid("bob"), 500);
    assert_eq!(pool.participant("bob").staked, COIN);
}

#[tokio::test]
async fn test_replayed_block_is_ignored() {
    let mut pool = Pool::new(no_fees());
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    pool.chain.push_block(Some(COIN), None, vec![]);
    pool.sync().await;

    let block = pool.chain.block_at(2).unwrap();
    assert_eq!(pool.allocator.apply(&block).unwrap(), ApplyOutcome::Duplicate);
    assert_eq!(pool.unpaid("alice"), COIN);
    assert_eq!(pool.sync().await, 0);
}

#[tokio::test]
async fn test_rewards_are_conserved() {
    let mut pool = Pool::new(ParameterSchedule::default());
    pool.chain.push_block(
        None,
        None,
        vec![
            StakeChange::deposit("alice", 7 * COIN),
            StakeChange::deposit("bob", 3 * COIN),
            StakeChange::deposit("carol", 11 * COIN + 3),
        ],
    );
    let mut total_rewards = 0u128;
    for i in 0..40u64 {
        let reward = 75_000_000 + i * 7_919;
        let staker = ["alice", "bob", "carol", "dave"][i as usize % 4];
        let changes = if i == 20 {
            vec![StakeChange::withdrawal("bob", COIN)]
        } else {
            vec![]
        };
        pool.chain.push_block(Some(reward), Some(staker), changes);
        total_rewards += reward as u128;
    }
    pool.sync().await;

    let stats = pool.ledger.stats().unwrap();
    assert_eq!(stats.marker_height, Some(41));
    assert_eq!(stats.total_unpaid + stats.operator_fee as u128, total_rewards);
    assert_eq!(stats.total_staked, (20 * COIN + 3) as u128);
}
