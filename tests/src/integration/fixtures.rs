//! Shared pool fixture: every subsystem wired to the mock node.

use csp_01_chain_watcher::{ChainWatcher, MockChainSource, WatcherConfig, WatcherError};
use csp_02_participant_ledger::{
    FileBackedKVStore, InMemoryKVStore, KeyValueStore, Participant, ParticipantLedger,
};
use csp_03_reward_allocator::RewardAllocator;
use csp_04_payout_scheduler::{MockPayoutTransport, PayoutScheduler, SchedulerConfig};
use csp_05_recovery::{Reconciler, RecoveryConfig};
use pool_runtime::handlers::PoolEventHandler;
use shared_types::{
    Amount, HealthMonitor, ParameterSchedule, ParticipantId, PoolParameters,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Parameters without fees or bonus, default payout rules.
pub fn no_fees() -> ParameterSchedule {
    ParameterSchedule::single(PoolParameters {
        pool_fee_bps: 0,
        stake_bonus_bps: 0,
        ..PoolParameters::default()
    })
}

pub struct Pool {
    pub chain: Arc<MockChainSource>,
    pub transport: Arc<MockPayoutTransport>,
    pub ledger: Arc<ParticipantLedger>,
    pub health: Arc<HealthMonitor>,
    pub allocator: Arc<RewardAllocator>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: PayoutScheduler,
    handler: PoolEventHandler,
    watcher: ChainWatcher,
    _shutdown_tx: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl Pool {
    /// In-memory pool on a fresh mock chain.
    pub fn new(schedule: ParameterSchedule) -> Self {
        Self::with_store(
            Box::new(InMemoryKVStore::new()),
            Arc::new(MockChainSource::new()),
            Arc::new(MockPayoutTransport::new()),
            schedule,
        )
    }

    /// Pool whose ledger lives in `dir`, as after a restart.
    pub fn on_disk(
        dir: &Path,
        chain: Arc<MockChainSource>,
        transport: Arc<MockPayoutTransport>,
        schedule: ParameterSchedule,
    ) -> Self {
        let store = FileBackedKVStore::open(dir.join("ledger.bin")).unwrap();
        Self::with_store(Box::new(store), chain, transport, schedule)
    }

    pub fn with_store(
        store: Box<dyn KeyValueStore>,
        chain: Arc<MockChainSource>,
        transport: Arc<MockPayoutTransport>,
        schedule: ParameterSchedule,
    ) -> Self {
        let recovery = RecoveryConfig::for_testing();
        let ledger = Arc::new(
            ParticipantLedger::new(store).with_journal_depth(recovery.max_reorg_depth),
        );
        let health = Arc::new(HealthMonitor::new(3));
        let allocator = Arc::new(RewardAllocator::new(ledger.clone(), schedule.clone()));
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            chain.clone(),
            Some(transport.clone()),
            recovery,
            health.clone(),
        ));
        let scheduler = PayoutScheduler::new(
            ledger.clone(),
            transport.clone(),
            schedule,
            SchedulerConfig::for_testing(),
            health.clone(),
        );
        let handler = PoolEventHandler::new(
            ledger.clone(),
            allocator.clone(),
            reconciler.clone(),
            health.clone(),
        );
        let watcher = ChainWatcher::new(
            chain.clone(),
            WatcherConfig::for_testing(),
            health.clone(),
            ledger.marker().unwrap(),
        );
        let (shutdown_tx, shutdown) = watch::channel(false);

        Self {
            chain,
            transport,
            ledger,
            health,
            allocator,
            reconciler,
            scheduler,
            handler,
            watcher,
            _shutdown_tx: shutdown_tx,
            shutdown,
        }
    }

    /// Apply every confirmed block; returns the number of events handled.
    pub async fn sync(&mut self) -> usize {
        self.try_sync().await.unwrap()
    }

    pub async fn try_sync(&mut self) -> Result<usize, WatcherError> {
        self.watcher.poll_once(&self.handler, &self.shutdown).await
    }

    pub fn marker_height(&self) -> u64 {
        self.ledger.marker().unwrap().map_or(0, |m| m.height)
    }

    pub fn participant(&self, id: &str) -> Participant {
        self.ledger
            .participant(&ParticipantId::new(id))
            .unwrap()
            .unwrap_or_else(|| Participant::new(ParticipantId::new(id)))
    }

    pub fn unpaid(&self, id: &str) -> Amount {
        self.participant(id).unpaid
    }

    pub fn operator_fee(&self) -> Amount {
        self.ledger.operator_fee_balance().unwrap()
    }
}
