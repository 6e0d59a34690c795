//! Reorgs detected by the watcher and undone through the block journal.

use super::fixtures::{no_fees, Pool};
use shared_types::{StakeChange, COIN};

#[tokio::test]
async fn test_reorg_reverses_credits_and_rewinds_marker() {
    let mut pool = Pool::new(no_fees());
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    pool.chain.push_block(Some(1_000), None, vec![]);
    pool.chain.push_block(Some(1_000), None, vec![]);
    pool.sync().await;
    assert_eq!(pool.unpaid("alice"), 2_000);

    // Block 3 is orphaned; the new chain has no pool reward there.
    pool.chain.fork_from(3);
    pool.chain.push_empty(2);
    pool.sync().await;

    assert_eq!(pool.unpaid("alice"), 1_000);
    assert_eq!(pool.marker_height(), 4);
    let applied = pool.ledger.applied_block(3).unwrap().unwrap();
    assert_eq!(applied.hash, pool.chain.block_at(3).unwrap().hash);
    assert!(!pool.health.is_halted());
}

#[tokio::test]
async fn test_reorg_reverses_stake_changes() {
    let mut pool = Pool::new(no_fees());
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("bob", COIN)]);
    pool.sync().await;
    assert_eq!(pool.participant("bob").staked, COIN);

    // Bob's deposit lands one block later on the new chain.
    pool.chain.fork_from(2);
    pool.chain.push_empty(1);
    pool.chain.push_block(None, None, vec![StakeChange::deposit("bob", COIN)]);
    pool.chain.push_block(Some(1_000), None, vec![]);
    pool.sync().await;

    assert_eq!(pool.marker_height(), 4);
    assert_eq!(pool.participant("bob").staked, COIN);
    assert_eq!(pool.unpaid("alice"), 500);
    assert_eq!(pool.unpaid("bob"), 500);
}

#[tokio::test]
async fn test_reorg_after_payout_leaves_reward_debt() {
    let mut pool = Pool::new(no_fees());
    pool.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    pool.chain.push_block(Some(COIN), None, vec![]);
    pool.sync().await;

    let report = pool.scheduler.run_payouts(2).await.unwrap();
    assert_eq!(report.submitted, vec![1]);
    assert_eq!(pool.unpaid("alice"), 0);

    // The rewarded block disappears after its reward was paid out.
    pool.chain.fork_from(2);
    pool.chain.push_empty(3);
    pool.sync().await;

    let alice = pool.participant("alice");
    assert_eq!(pool.marker_height(), 4);
    assert_eq!(alice.unpaid, 0);
    assert_eq!(alice.reward_debt, COIN);

    // Later rewards settle the debt before anything becomes payable.
    pool.chain.push_block(Some(3 * COIN / 2), None, vec![]);
    pool.sync().await;

    let alice = pool.participant("alice");
    assert_eq!(alice.reward_debt, 0);
    assert_eq!(alice.unpaid, COIN / 2);
}

#[tokio::test]
async fn test_reorg_deeper_than_limit_halts() {
    let mut pool = Pool::new(no_fees());
    pool.chain.push_empty(60);
    pool.sync().await;

    pool.chain.fork_from(2);
    pool.chain.push_empty(60);

    assert!(pool.try_sync().await.is_err());
    assert!(pool.health.is_halted());
    assert_eq!(pool.marker_height(), 60);

    // Halted: nothing more is applied.
    assert!(pool.try_sync().await.is_err());
    assert_eq!(pool.marker_height(), 60);
}
