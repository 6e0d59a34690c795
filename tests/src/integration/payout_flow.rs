//! Accrue, pay and confirm through the scheduler.

use super::fixtures::{no_fees, Pool};
use csp_02_participant_ledger::BatchStatus;
use csp_04_payout_scheduler::SendBehaviour;
use shared_types::{NodeError, ParticipantId, StakeChange, COIN};

/// Alice 3 COIN and bob 1 COIN staked, one 2 COIN reward at height 2.
async fn rewarded_pool() -> Pool {
    let mut pool = Pool::new(no_fees());
    pool.chain.push_block(
        None,
        None,
        vec![
            StakeChange::deposit("alice", 3 * COIN),
            StakeChange::deposit("bob", COIN),
        ],
    );
    pool.chain.push_block(Some(2 * COIN), None, vec![]);
    pool.sync().await;
    pool
}

#[tokio::test]
async fn test_accrue_pay_confirm() {
    let pool = rewarded_pool().await;
    assert_eq!(pool.unpaid("alice"), 3 * COIN / 2);
    assert_eq!(pool.unpaid("bob"), COIN / 2);

    let report = pool.scheduler.tick(2).await.unwrap();
    assert_eq!(report.payouts.submitted, vec![1]);
    assert!(report.confirmations.confirmed.is_empty());

    let sent = pool.transport.sent();
    assert_eq!(sent.len(), 1);
    let outputs: Vec<(ParticipantId, u64)> = sent[0]
        .entries
        .iter()
        .map(|e| (e.participant.clone(), e.amount))
        .collect();
    assert_eq!(
        outputs,
        vec![
            (ParticipantId::new("alice"), 3 * COIN / 2),
            (ParticipantId::new("bob"), COIN / 2),
        ]
    );
    assert_eq!(pool.unpaid("alice"), 0);
    assert_eq!(pool.ledger.batch(1).unwrap().status, BatchStatus::Submitted);

    pool.transport.confirm_all(2);
    let report = pool.scheduler.tick(3).await.unwrap();
    assert!(report.payouts.submitted.is_empty());
    assert_eq!(report.confirmations.confirmed, vec![1]);

    assert_eq!(pool.ledger.batch(1).unwrap().status, BatchStatus::Confirmed);
    let alice = pool.participant("alice");
    assert_eq!(alice.total_paid, 3 * COIN / 2);
    assert_eq!(alice.last_payout_height, Some(2));
    assert_eq!(pool.transport.send_attempts(), 1);
}

#[tokio::test]
async fn test_rejected_send_reverts_debit() {
    let pool = rewarded_pool().await;
    pool.transport
        .script_sends([SendBehaviour::Fail(NodeError::TransactionRejected(
            "bad-txns-vout-negative".to_string(),
        ))]);

    let report = pool.scheduler.run_payouts(2).await.unwrap();
    assert_eq!(report.failed, vec![1]);
    assert!(report.submitted.is_empty());

    let batch = pool.ledger.batch(1).unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.note.is_some());
    let alice = pool.participant("alice");
    assert_eq!(alice.unpaid, 3 * COIN / 2);
    assert_eq!(alice.total_paid, 0);
    assert_eq!(alice.last_payout_height, None);

    // The next round pays again under a new batch id.
    let report = pool.scheduler.run_payouts(3).await.unwrap();
    assert_eq!(report.submitted, vec![2]);
    assert_eq!(pool.unpaid("alice"), 0);
}

#[tokio::test]
async fn test_unreachable_node_stops_round() {
    let mut pool = Pool::new(no_fees());
    let deposits = (0..12)
        .map(|i| StakeChange::deposit(format!("p{:02}", i).as_str(), COIN))
        .collect();
    pool.chain.push_block(None, None, deposits);
    pool.chain.push_block(Some(12 * COIN), None, vec![]);
    pool.sync().await;

    pool.transport
        .script_sends([SendBehaviour::Fail(NodeError::Unreachable(
            "connection refused".to_string(),
        ))]);
    let report = pool.scheduler.run_payouts(2).await.unwrap();

    // The second chunk is never attempted.
    assert_eq!(report.failed, vec![1]);
    assert_eq!(pool.transport.send_attempts(), 1);
    assert_eq!(pool.ledger.stats().unwrap().total_unpaid, (12 * COIN) as u128);
}

#[tokio::test]
async fn test_timed_out_send_is_located_not_resent() {
    let pool = rewarded_pool().await;
    pool.transport
        .script_sends([SendBehaviour::AcceptThenTimeout]);

    let report = pool.scheduler.run_payouts(2).await.unwrap();
    assert_eq!(report.ambiguous, vec![1]);
    assert_eq!(pool.ledger.batch(1).unwrap().status, BatchStatus::Pending);
    // Debit stands while the outcome is unknown.
    assert_eq!(pool.unpaid("alice"), 0);

    let report = pool.scheduler.tick(3).await.unwrap();
    assert_eq!(report.reconciled.located, vec![1]);
    assert!(report.payouts.submitted.is_empty());

    let batch = pool.ledger.batch(1).unwrap();
    assert_eq!(batch.status, BatchStatus::Submitted);
    assert_eq!(batch.txid, pool.transport.txid_for(1));
    assert_eq!(pool.transport.send_attempts(), 1);
    assert_eq!(pool.transport.sent().len(), 1);
}

#[tokio::test]
async fn test_payouts_split_by_output_limit() {
    let mut pool = Pool::new(no_fees());
    let deposits = (0..12)
        .map(|i| StakeChange::deposit(format!("p{:02}", i).as_str(), COIN))
        .collect();
    pool.chain.push_block(None, None, deposits);
    pool.chain.push_block(Some(12 * COIN), None, vec![]);
    pool.sync().await;

    let report = pool.scheduler.run_payouts(2).await.unwrap();
    assert_eq!(report.submitted, vec![1, 2]);

    let sent = pool.transport.sent();
    assert_eq!(sent[0].entries.len(), 10);
    assert_eq!(sent[1].entries.len(), 2);
    assert_eq!(sent[1].entries[1].participant, ParticipantId::new("p11"));
    assert_eq!(pool.ledger.stats().unwrap().total_unpaid, 0);
}

#[tokio::test]
async fn test_recently_paid_participant_waits() {
    let mut pool = rewarded_pool().await;
    pool.scheduler.run_payouts(2).await.unwrap();

    pool.chain.push_block(Some(2 * COIN), None, vec![]);
    pool.sync().await;
    assert_eq!(pool.unpaid("alice"), 3 * COIN / 2);

    // Default parameters ask for 100 blocks between payments.
    let report = pool.scheduler.run_payouts(3).await.unwrap();
    assert!(report.submitted.is_empty());
    let report = pool.scheduler.run_payouts(102).await.unwrap();
    assert_eq!(report.submitted, vec![2]);
}
