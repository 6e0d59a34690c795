//! Restarts against an on-disk ledger.

use super::fixtures::{no_fees, Pool};
use csp_01_chain_watcher::MockChainSource;
use csp_02_participant_ledger::{BatchStatus, PayoutEntry};
use csp_04_payout_scheduler::{MockPayoutTransport, PayoutTransport};
use csp_05_recovery::ChainReconciliation;
use shared_types::{ParticipantId, StakeChange, COIN};
use std::sync::Arc;

struct Node {
    chain: Arc<MockChainSource>,
    transport: Arc<MockPayoutTransport>,
}

impl Node {
    fn new() -> Self {
        Self {
            chain: Arc::new(MockChainSource::new()),
            transport: Arc::new(MockPayoutTransport::new()),
        }
    }

    fn pool(&self, dir: &std::path::Path) -> Pool {
        Pool::on_disk(dir, self.chain.clone(), self.transport.clone(), no_fees())
    }
}

/// Alice holds 2 COIN of unpaid rewards at height 3.
async fn accrued(node: &Node, dir: &std::path::Path) -> Pool {
    node.chain
        .push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    node.chain.push_block(Some(COIN), None, vec![]);
    node.chain.push_block(Some(COIN), None, vec![]);
    let mut pool = node.pool(dir);
    pool.sync().await;
    pool
}

fn debit_alice(pool: &Pool) -> u64 {
    pool.ledger
        .debit_for_payout(vec![PayoutEntry::new(ParticipantId::new("alice"), 2 * COIN)], 3)
        .unwrap()
        .id
}

#[tokio::test]
async fn test_crash_before_send_reverts_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new();
    {
        let pool = accrued(&node, dir.path()).await;
        debit_alice(&pool);
        assert_eq!(pool.unpaid("alice"), 0);
        // Process dies before the transaction is sent.
    }

    let pool = node.pool(dir.path());
    let report = pool.reconciler.startup().await.unwrap();

    let batches = report.batches.unwrap();
    assert_eq!(batches.reverted, vec![1]);
    assert!(batches.located.is_empty());
    assert_eq!(pool.ledger.batch(1).unwrap().status, BatchStatus::Failed);
    assert_eq!(pool.unpaid("alice"), 2 * COIN);
    assert_eq!(pool.transport.send_attempts(), 0);
}

#[tokio::test]
async fn test_crash_after_send_is_located_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new();
    {
        let pool = accrued(&node, dir.path()).await;
        let id = debit_alice(&pool);
        let batch = pool.ledger.batch(id).unwrap();
        node.transport.send_payout(&batch).await.unwrap();
        // Process dies before recording the txid.
    }

    let pool = node.pool(dir.path());
    let report = pool.reconciler.startup().await.unwrap();

    let batches = report.batches.unwrap();
    assert_eq!(batches.located, vec![1]);
    assert_eq!(batches.waiting, vec![1]);
    assert!(batches.reverted.is_empty());
    assert_eq!(pool.unpaid("alice"), 0);

    node.transport.confirm_all(2);
    let batches = pool.reconciler.reconcile_batches(3).await.unwrap();
    assert_eq!(batches.confirmed, vec![1]);
    assert_eq!(pool.ledger.batch(1).unwrap().status, BatchStatus::Confirmed);
    assert_eq!(node.transport.send_attempts(), 1);
}

#[tokio::test]
async fn test_restart_resumes_from_marker() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new();
    drop(accrued(&node, dir.path()).await);

    node.chain.push_block(Some(COIN), None, vec![]);
    let mut pool = node.pool(dir.path());
    let report = pool.reconciler.startup().await.unwrap();
    assert!(matches!(report.chain, ChainReconciliation::InSync(m) if m.height == 3));

    // Only the new block is applied.
    assert_eq!(pool.sync().await, 1);
    assert_eq!(pool.marker_height(), 4);
    assert_eq!(pool.unpaid("alice"), 3 * COIN);
}

#[tokio::test]
async fn test_reorg_while_down_rolls_back_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new();
    drop(accrued(&node, dir.path()).await);

    node.chain.fork_from(3);
    node.chain.push_empty(2);

    let mut pool = node.pool(dir.path());
    let report = pool.reconciler.startup().await.unwrap();
    assert_eq!(report.chain.depth(), 1);
    assert_eq!(report.chain.marker().unwrap().height, 2);
    assert_eq!(pool.unpaid("alice"), COIN);

    pool.sync().await;
    assert_eq!(pool.marker_height(), 4);
    assert_eq!(pool.unpaid("alice"), COIN);
    assert!(!pool.health.is_halted());
}
