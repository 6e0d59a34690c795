//! # Reward Allocator Service
//!
//! Applies confirmed blocks to the ledger: stake changes always, a reward
//! allocation when the pool staked the block. Each block is one atomic
//! ledger commit, and a block already applied is ignored.

use crate::domain::{allocate, Allocation, AllocatorError, FeePolicy};
use csp_02_participant_ledger::{BlockCommit, LedgerError, ParticipantLedger};
use shared_types::{ChainBlock, ParameterSchedule, ProcessedHeightMarker};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`RewardAllocator::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The block was committed.
    Applied {
        /// New ledger marker.
        marker: ProcessedHeightMarker,
        /// Reward split, when the block carried a reward.
        allocation: Option<Allocation>,
    },
    /// The block (or its reward event) was already applied.
    Duplicate,
}

/// The Reward Allocator.
pub struct RewardAllocator {
    ledger: Arc<ParticipantLedger>,
    schedule: ParameterSchedule,
}

impl RewardAllocator {
    pub fn new(ledger: Arc<ParticipantLedger>, schedule: ParameterSchedule) -> Self {
        Self { ledger, schedule }
    }

    /// Parameter schedule in use.
    pub fn schedule(&self) -> &ParameterSchedule {
        &self.schedule
    }

    /// Apply one confirmed block.
    pub fn apply(&self, block: &ChainBlock) -> Result<ApplyOutcome, AllocatorError> {
        if let Some(marker) = self.ledger.marker()? {
            if block.height <= marker.height {
                debug!(
                    "[csp-03] Ignoring block {} at height {}: marker is {}",
                    block.hash, block.height, marker.height
                );
                return Ok(ApplyOutcome::Duplicate);
            }
        }

        let event = block.reward_event();
        if let Some(event) = &event {
            if self.ledger.has_reward_event(&event.block_hash)? {
                debug!("[csp-03] Reward event {} already applied", event.block_hash);
                return Ok(ApplyOutcome::Duplicate);
            }
        }

        let allocation = match &event {
            Some(event) => {
                let snapshot = self.ledger.snapshot(block.height)?;
                let policy = FeePolicy::from(self.schedule.at(block.height));
                Some(allocate(event, &snapshot, policy))
            }
            None => None,
        };

        let (credits, operator_fee) = match &allocation {
            Some(a) => (a.credits.clone(), a.operator_fee),
            None => (Vec::new(), 0),
        };
        let commit = BlockCommit {
            height: block.height,
            hash: block.hash,
            prev_hash: block.prev_hash,
            stake_changes: block.stake_changes.clone(),
            reward: event,
            credits,
            operator_fee,
        };

        let marker = match self.ledger.commit_block(commit) {
            Ok(marker) => marker,
            Err(LedgerError::DuplicateEvent { height, hash }) => {
                debug!("[csp-03] Block {} at {} applied concurrently", hash, height);
                return Ok(ApplyOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(a) = &allocation {
            info!(
                "[csp-03] Block {} reward split: {} participants credited {}, operator fee {} (bonus {}, dust {})",
                block.height,
                a.credits.len(),
                a.credited(),
                a.operator_fee,
                a.stake_bonus,
                a.remainder
            );
        }

        Ok(ApplyOutcome::Applied { marker, allocation })
    }
}
