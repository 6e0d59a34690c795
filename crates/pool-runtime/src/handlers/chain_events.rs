//! # Chain Event Handler
//!
//! Connects the chain watcher to the ledger.
//!
//! - `Block` goes through the reward allocator (one atomic commit)
//! - `Reorg` runs chain reconciliation, rolling the ledger back to the
//!   common ancestor
//!
//! Either way the handler answers with the ledger marker, which the
//! watcher adopts as its new cursor.

use async_trait::async_trait;
use csp_01_chain_watcher::{ChainEvent, ChainEventHandler, WatcherError};
use csp_02_participant_ledger::ParticipantLedger;
use csp_03_reward_allocator::{AllocatorError, ApplyOutcome, RewardAllocator};
use csp_05_recovery::{ChainReconciliation, Reconciler};
use shared_types::{ChainBlock, HealthMonitor, ProcessedHeightMarker};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Watcher consumer backed by the ledger.
pub struct PoolEventHandler {
    ledger: Arc<ParticipantLedger>,
    allocator: Arc<RewardAllocator>,
    reconciler: Arc<Reconciler>,
    health: Arc<HealthMonitor>,
}

impl PoolEventHandler {
    pub fn new(
        ledger: Arc<ParticipantLedger>,
        allocator: Arc<RewardAllocator>,
        reconciler: Arc<Reconciler>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            ledger,
            allocator,
            reconciler,
            health,
        }
    }

    fn current_marker(&self) -> Result<Option<ProcessedHeightMarker>, WatcherError> {
        self.ledger
            .marker()
            .map_err(|e| WatcherError::Handler(e.to_string()))
    }

    fn apply_block(&self, block: &ChainBlock) -> Result<(), AllocatorError> {
        match self.allocator.apply(block)? {
            ApplyOutcome::Applied {
                allocation: Some(allocation),
                ..
            } => info!(
                "[csp-03] Block {} reward split: {} credited to {} participants, fee {}",
                block.height,
                allocation.credited(),
                allocation.credits.len(),
                allocation.operator_fee
            ),
            ApplyOutcome::Applied { .. } => {}
            ApplyOutcome::Duplicate => debug!("[csp-03] Block {} already applied", block.height),
        }
        Ok(())
    }

    async fn reconcile(&self) -> Result<(), WatcherError> {
        match self.reconciler.reconcile_chain().await {
            Ok(ChainReconciliation::RolledBack { from, to }) => {
                info!(
                    "[csp-05] Ledger rolled back from {} to {}",
                    from.height, to.height
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(WatcherError::Handler(e.to_string())),
        }
    }
}

#[async_trait]
impl ChainEventHandler for PoolEventHandler {
    async fn marker(&self) -> Result<Option<ProcessedHeightMarker>, WatcherError> {
        self.current_marker()
    }

    async fn handle(
        &self,
        event: ChainEvent,
    ) -> Result<Option<ProcessedHeightMarker>, WatcherError> {
        if self.health.is_halted() || self.ledger.is_halted() {
            return Err(WatcherError::Handler("pool is halted".to_string()));
        }

        match event {
            ChainEvent::Block(block) => match self.apply_block(&block) {
                Ok(()) => {}
                Err(e) if e.is_reorg() => {
                    warn!("[csp-03] Block {} does not extend the ledger: {}", block.height, e);
                    self.reconcile().await?;
                }
                Err(AllocatorError::Ledger(e)) => {
                    if e.is_fatal() {
                        self.health.halt(format!("ledger failure at block {}: {}", block.height, e));
                    }
                    return Err(WatcherError::Handler(e.to_string()));
                }
            },
            ChainEvent::Reorg { height } => {
                warn!("[csp-01] Reorg reported at height {}", height);
                self.reconcile().await?;
            }
        }

        self.current_marker()
    }
}
