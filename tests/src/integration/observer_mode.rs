//! An observer follows the same chain as the master without paying.

use csp_01_chain_watcher::MockChainSource;
use csp_02_participant_ledger::InMemoryKVStore;
use csp_04_payout_scheduler::MockPayoutTransport;
use pool_runtime::status::STATUS_FILE;
use pool_runtime::{PoolMode, PoolRuntime, RuntimeConfig, StatusDocument};
use shared_types::{ParticipantId, StakeChange, COIN};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn runtime(
    dir: &Path,
    mode: PoolMode,
    chain: Arc<MockChainSource>,
    transport: Arc<MockPayoutTransport>,
) -> PoolRuntime {
    PoolRuntime::new(
        RuntimeConfig::for_testing(mode),
        dir,
        Box::new(InMemoryKVStore::new()),
        chain,
        transport,
    )
    .unwrap()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_observer_mirrors_master_accrual() {
    let master_dir = tempfile::tempdir().unwrap();
    let observer_dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    let transport = Arc::new(MockPayoutTransport::new());
    chain.push_block(
        None,
        None,
        vec![
            StakeChange::deposit("alice", 10 * COIN),
            StakeChange::deposit("bob", 5 * COIN),
        ],
    );
    chain.push_block(Some(3 * COIN), Some("alice"), vec![]);

    let master = runtime(master_dir.path(), PoolMode::Master, chain.clone(), transport.clone());
    let observer = runtime(observer_dir.path(), PoolMode::Observer, chain, transport.clone());
    assert!(observer.scheduler().is_none());

    master.start().await.unwrap();
    observer.start().await.unwrap();

    let master_ledger = master.ledger().clone();
    let observer_ledger = observer.ledger().clone();
    let alice = ParticipantId::new("alice");
    wait_for(|| {
        matches!(master_ledger.participant(&alice), Ok(Some(p)) if p.total_paid > 0)
    })
    .await;
    wait_for(|| matches!(observer_ledger.marker(), Ok(Some(m)) if m.height == 2)).await;

    master.shutdown().await;
    observer.shutdown().await;

    // Only the master's payouts reached the node.
    assert_eq!(transport.sent().len(), 1);

    for id in ["alice", "bob"] {
        let id = ParticipantId::new(id);
        let paid = master_ledger.participant(&id).unwrap().unwrap();
        let watched = observer_ledger.participant(&id).unwrap().unwrap();
        assert_eq!(watched.total_paid, 0);
        assert_eq!(watched.unpaid, paid.unpaid + paid.total_paid);
        assert_eq!(watched.staked, paid.staked);
    }
    assert_eq!(
        observer_ledger.operator_fee_balance().unwrap(),
        master_ledger.operator_fee_balance().unwrap()
    );
}

#[tokio::test]
async fn test_observer_publishes_status() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.push_block(None, None, vec![StakeChange::deposit("alice", COIN)]);
    chain.push_block(Some(COIN), None, vec![]);
    chain.push_empty(1);

    let observer = runtime(
        dir.path(),
        PoolMode::Observer,
        chain,
        Arc::new(MockPayoutTransport::new()),
    );
    observer.start().await.unwrap();
    let ledger = observer.ledger().clone();
    wait_for(|| matches!(ledger.marker(), Ok(Some(m)) if m.height == 3)).await;
    observer.shutdown().await;

    let text = std::fs::read_to_string(dir.path().join(STATUS_FILE)).unwrap();
    let doc: StatusDocument = serde_json::from_str(&text).unwrap();
    assert_eq!(doc.mode, PoolMode::Observer);
    assert_eq!(doc.ledger.marker_height, Some(3));
    assert_eq!(doc.ledger.participants, 1);
    assert_eq!(doc.ledger.total_unpaid, COIN as u128);
}
