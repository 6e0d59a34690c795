//! # Pool Runtime
//!
//! Wires the subsystems together and owns the background tasks.
//!
//! ## Startup Sequence
//!
//! 1. Lock the pool directory (one engine per ledger)
//! 2. Open the ledger store
//! 3. Startup recovery: integrity check, chain reconciliation, batches
//! 4. Spawn the chain watcher, the status refresher and, in master mode,
//!    the payout scheduler
//!
//! The status refresher also asks the node for its version whenever the
//! node answers, so a node that comes up after the pool still shows in the
//! status document.
//!
//! Recovery that fails because the node is unreachable does not stop the
//! pool: the watcher detects any fork on its own and the scheduler settles
//! pending batches every round. Errors that need an operator leave the pool
//! halted, still refreshing its status.

use crate::adapters::storage::{available_space, open_ledger_store};
use crate::handlers::PoolEventHandler;
use crate::settings::{PoolMode, PoolSettings};
use crate::status::StatusCache;
use anyhow::{Context, Result};
use csp_01_chain_watcher::{ChainSource, ChainWatcher, WatcherConfig};
use csp_02_participant_ledger::{KeyValueStore, ParticipantLedger};
use csp_03_reward_allocator::RewardAllocator;
use csp_04_payout_scheduler::{PayoutScheduler, PayoutTransport, SchedulerConfig};
use csp_05_recovery::{Reconciler, RecoveryConfig, StartupReport};
use fs2::FileExt;
use parking_lot::Mutex;
use shared_types::{HealthMonitor, ParameterSchedule};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lock file inside the pool directory.
pub const LOCK_FILE: &str = ".lock";

/// Free space below which startup warns.
const LOW_DISK_SPACE: u64 = 256 * 1024 * 1024;

/// Subsystem configuration, resolved from the settings file.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub mode: PoolMode,
    pub schedule: ParameterSchedule,
    pub watcher: WatcherConfig,
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
    /// Consecutive node failures before the pool reports `Degraded`.
    pub degrade_after: u32,
    /// How often the status document is refreshed and persisted.
    pub status_interval: Duration,
    /// Node version the pool was prepared for (`coreversion`).
    pub core_version: Option<String>,
}

impl RuntimeConfig {
    pub fn from_settings(settings: &PoolSettings) -> Result<Self> {
        Ok(Self {
            mode: settings.mode,
            schedule: settings.schedule()?,
            watcher: settings.watcher_config(),
            scheduler: settings.scheduler_config(),
            recovery: settings.recovery_config(),
            degrade_after: settings.degradeafter,
            status_interval: Duration::from_secs(settings.pollintervalsecs.max(1)),
            core_version: settings.coreversion.clone(),
        })
    }

    pub fn for_testing(mode: PoolMode) -> Self {
        Self {
            mode,
            schedule: ParameterSchedule::default(),
            watcher: WatcherConfig::for_testing(),
            scheduler: SchedulerConfig::for_testing(),
            recovery: RecoveryConfig::for_testing(),
            degrade_after: 3,
            status_interval: Duration::from_millis(5),
            core_version: None,
        }
    }
}

/// Whether the node's `subversion` satisfies the configured version pin.
pub fn version_matches(pin: &str, subversion: &str) -> bool {
    let pin = pin.trim_matches('/');
    subversion
        .trim_matches('/')
        .split(':')
        .any(|part| part == pin || part.starts_with(&format!("{}.", pin)))
}

/// Publish the node version; logs when it first appears or changes.
fn note_node_version(status: &StatusCache, pin: Option<&str>, version: String) {
    if !status.set_core(version.clone()) {
        return;
    }
    info!("Connected to node {}", version);
    if let Some(pin) = pin {
        if !version_matches(pin, &version) {
            warn!("Node runs {} but the pool was prepared for {}", version, pin);
        }
    }
}

/// Lock `pool_dir` for this process; the lock lives as long as the file.
pub fn lock_pool_dir(pool_dir: &Path) -> Result<File> {
    std::fs::create_dir_all(pool_dir)
        .with_context(|| format!("Cannot create pool directory {}", pool_dir.display()))?;
    let path = pool_dir.join(LOCK_FILE);
    let file = File::create(&path).with_context(|| format!("Cannot open {}", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "{} is locked; another coldstakepool is using this pool directory",
            pool_dir.display()
        )
    })?;
    Ok(file)
}

/// The running pool.
pub struct PoolRuntime {
    config: RuntimeConfig,
    pool_dir: PathBuf,
    _lock: File,
    ledger: Arc<ParticipantLedger>,
    health: Arc<HealthMonitor>,
    chain: Arc<dyn ChainSource>,
    reconciler: Arc<Reconciler>,
    handler: Arc<PoolEventHandler>,
    scheduler: Option<Arc<PayoutScheduler>>,
    status: Arc<StatusCache>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolRuntime {
    /// Assemble the pool on top of a node connection and a ledger store.
    ///
    /// In observer mode `transport` is dropped and no scheduler exists.
    pub fn new(
        config: RuntimeConfig,
        pool_dir: &Path,
        store: Box<dyn KeyValueStore>,
        chain: Arc<dyn ChainSource>,
        transport: Arc<dyn PayoutTransport>,
    ) -> Result<Self> {
        let lock = lock_pool_dir(pool_dir)?;
        Ok(Self::assemble(config, pool_dir, lock, store, chain, transport))
    }

    /// Lock `pool_dir`, then open its ledger with the compiled-in backend.
    pub fn open(
        config: RuntimeConfig,
        pool_dir: &Path,
        chain: Arc<dyn ChainSource>,
        transport: Arc<dyn PayoutTransport>,
    ) -> Result<Self> {
        let lock = lock_pool_dir(pool_dir)?;
        let store = open_ledger_store(pool_dir)
            .with_context(|| format!("Cannot open the ledger in {}", pool_dir.display()))?;
        Ok(Self::assemble(config, pool_dir, lock, store, chain, transport))
    }

    fn assemble(
        config: RuntimeConfig,
        pool_dir: &Path,
        lock: File,
        store: Box<dyn KeyValueStore>,
        chain: Arc<dyn ChainSource>,
        transport: Arc<dyn PayoutTransport>,
    ) -> Self {
        match available_space(pool_dir) {
            Ok(free) if free < LOW_DISK_SPACE => warn!(
                "Only {} MiB free under {}",
                free / (1024 * 1024),
                pool_dir.display()
            ),
            Ok(_) => {}
            Err(e) => warn!("Cannot determine free disk space: {}", e),
        }

        let ledger = Arc::new(
            ParticipantLedger::new(store).with_journal_depth(config.recovery.max_reorg_depth),
        );
        let health = Arc::new(HealthMonitor::new(config.degrade_after));

        let transport = match config.mode {
            PoolMode::Master => Some(transport),
            PoolMode::Observer => None,
        };
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            chain.clone(),
            transport.clone(),
            config.recovery.clone(),
            health.clone(),
        ));
        let allocator = Arc::new(RewardAllocator::new(ledger.clone(), config.schedule.clone()));
        let handler = Arc::new(PoolEventHandler::new(
            ledger.clone(),
            allocator,
            reconciler.clone(),
            health.clone(),
        ));
        let scheduler = transport.map(|transport| {
            Arc::new(PayoutScheduler::new(
                ledger.clone(),
                transport,
                config.schedule.clone(),
                config.scheduler.clone(),
                health.clone(),
            ))
        });

        let status = Arc::new(StatusCache::new(config.mode));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            pool_dir: pool_dir.to_path_buf(),
            _lock: lock,
            ledger,
            health,
            chain,
            reconciler,
            handler,
            scheduler,
            status,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<ParticipantLedger> {
        &self.ledger
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn status(&self) -> &Arc<StatusCache> {
        &self.status
    }

    /// The payout scheduler; `None` in observer mode.
    pub fn scheduler(&self) -> Option<&Arc<PayoutScheduler>> {
        self.scheduler.as_ref()
    }

    /// Run startup recovery and spawn the background tasks.
    pub async fn start(&self) -> Result<()> {
        info!("===========================================");
        info!("  coldstakepool v{}", env!("CARGO_PKG_VERSION"));
        info!("  Mode: {:?}", self.config.mode);
        info!("  Pool dir: {}", self.pool_dir.display());
        info!("===========================================");

        if let Some(report) = self.recover().await {
            info!(
                "[csp-05] Startup recovery done: chain {:?}, batches {:?}",
                report.chain, report.batches
            );
        }

        let cursor = self.ledger.marker().context("Cannot read the ledger marker")?;
        let mut watcher = ChainWatcher::new(
            self.chain.clone(),
            self.config.watcher.clone(),
            self.health.clone(),
            cursor,
        );
        let handler = self.handler.clone();
        let shutdown = self.shutdown_rx.clone();
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(async move {
            watcher.run(handler, shutdown).await;
        }));

        if let Some(scheduler) = &self.scheduler {
            let scheduler = scheduler.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.run(shutdown).await;
            }));
        } else {
            info!("Observer mode: payouts are disabled");
        }

        tasks.push(self.spawn_status_refresher());
        Ok(())
    }

    async fn recover(&self) -> Option<StartupReport> {
        match self.reconciler.startup().await {
            Ok(report) => Some(report),
            Err(e) if e.needs_operator() || self.health.is_halted() => {
                error!("[csp-05] Startup recovery needs an operator: {}. Pool is halted.", e);
                None
            }
            Err(e) => {
                warn!("[csp-05] Startup recovery incomplete, continuing: {}", e);
                None
            }
        }
    }

    fn spawn_status_refresher(&self) -> JoinHandle<()> {
        let status = self.status.clone();
        let ledger = self.ledger.clone();
        let health = self.health.clone();
        let chain = self.chain.clone();
        let retry = self.config.watcher.retry.clone();
        let pool_dir = self.pool_dir.clone();
        let period = self.config.status_interval;
        let pin = self.config.core_version.clone();
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Ok(tip) = retry.run_once(chain.tip()).await {
                            status.record_chain_height(tip.height);
                            match retry.run_once(chain.node_version()).await {
                                Ok(version) => note_node_version(&status, pin.as_deref(), version),
                                Err(e) => debug!("Node version query failed: {}", e),
                            }
                        }
                        status.refresh(&ledger, &health);
                        if let Err(e) = status.persist(&pool_dir) {
                            warn!("Cannot write status document: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Task ended abnormally: {}", e);
            }
        }
        self.status.refresh(&self.ledger, &self.health);
        if let Err(e) = self.status.persist(&self.pool_dir) {
            warn!("Cannot write status document: {}", e);
        }
        info!("Pool stopped at marker {:?}", self.ledger.marker().ok().flatten().map(|m| m.height));
    }
}
