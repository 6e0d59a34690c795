//! # Outbound Ports
//!
//! The node the watcher reads from and the consumer it feeds.

use crate::domain::{ChainEvent, WatcherError};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{
    Amount, BlockHash, BlockHeight, ChainBlock, ChainTip, NodeError, ParticipantId,
    ProcessedHeightMarker, StakeChange,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Read access to the node's best chain.
///
/// Production: `GhostRpcClient` (pool-runtime/adapters/ghost_rpc.rs)
/// Testing: [`MockChainSource`]
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Best-chain tip.
    async fn tip(&self) -> Result<ChainTip, NodeError>;

    /// Hash of the best-chain block at `height`.
    async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, NodeError>;

    /// Best-chain block at `height`, reduced to pool activity.
    async fn block(&self, height: BlockHeight) -> Result<ChainBlock, NodeError>;

    /// Node software version, e.g. `/Ghost:0.21.1.7/`.
    async fn node_version(&self) -> Result<String, NodeError>;
}

/// Consumer of chain events.
///
/// The watcher re-aligns its cursor with the consumer's marker after every
/// event, so an event the consumer failed to apply is offered again.
#[async_trait]
pub trait ChainEventHandler: Send + Sync {
    /// Marker the consumer has durably applied.
    async fn marker(&self) -> Result<Option<ProcessedHeightMarker>, WatcherError>;

    /// Apply one event; returns the consumer's marker afterwards.
    async fn handle(
        &self,
        event: ChainEvent,
    ) -> Result<Option<ProcessedHeightMarker>, WatcherError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Version reported by [`MockChainSource`] unless overridden.
pub const MOCK_NODE_VERSION: &str = "/Ghost:0.21.1.7/";

struct MockState {
    blocks: BTreeMap<BlockHeight, ChainBlock>,
    fork: u8,
    failures: VecDeque<NodeError>,
    delay: Option<Duration>,
    offline: bool,
    version: String,
}

/// Scriptable in-memory chain for tests.
///
/// Block hashes are deterministic: [`MockChainSource::mock_hash`] of the
/// height and the current fork number.
pub struct MockChainSource {
    state: Mutex<MockState>,
    calls: AtomicU64,
}

impl Default for MockChainSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainSource {
    /// Empty chain; the first pushed block gets height 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                blocks: BTreeMap::new(),
                fork: 0,
                failures: VecDeque::new(),
                delay: None,
                offline: false,
                version: MOCK_NODE_VERSION.to_string(),
            }),
            calls: AtomicU64::new(0),
        }
    }

    /// Chain with `n` empty blocks.
    pub fn with_empty_blocks(n: u64) -> Self {
        let source = Self::new();
        source.push_empty(n);
        source
    }

    /// Deterministic hash for a height on a fork.
    pub fn mock_hash(height: BlockHeight, fork: u8) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&height.to_be_bytes());
        bytes[31] = fork;
        BlockHash(bytes)
    }

    /// Append a block with pool activity; returns it.
    pub fn push_block(
        &self,
        reward: Option<Amount>,
        staker: Option<&str>,
        stake_changes: Vec<StakeChange>,
    ) -> ChainBlock {
        let mut state = self.state.lock();
        let (height, prev_hash) = match state.blocks.values().next_back() {
            Some(tip) => (tip.height + 1, tip.hash),
            None => (1, Self::mock_hash(0, 0)),
        };
        let block = ChainBlock {
            height,
            hash: Self::mock_hash(height, state.fork),
            prev_hash,
            timestamp: 1_700_000_000 + height * 120,
            reward,
            staker: staker.map(ParticipantId::new),
            stake_changes,
        };
        state.blocks.insert(height, block.clone());
        block
    }

    /// Append `n` blocks without pool activity.
    pub fn push_empty(&self, n: u64) {
        for _ in 0..n {
            self.push_block(None, None, vec![]);
        }
    }

    /// Drop every block at or above `height` and start a new fork; blocks
    /// pushed afterwards get fresh hashes.
    pub fn fork_from(&self, height: BlockHeight) {
        let mut state = self.state.lock();
        state.blocks.retain(|h, _| *h < height);
        state.fork = state.fork.wrapping_add(1);
    }

    /// Make the next calls fail with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = NodeError>) {
        self.state.lock().failures.extend(errors);
    }

    /// Refuse every call as unreachable until set back.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Change the reported node version.
    pub fn set_version(&self, version: impl Into<String>) {
        self.state.lock().version = version.into();
    }

    /// Delay every answer (used to provoke call timeouts).
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Block currently at `height`.
    pub fn block_at(&self, height: BlockHeight) -> Option<ChainBlock> {
        self.state.lock().blocks.get(&height).cloned()
    }

    /// Number of node calls served (including failed ones).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (failure, delay, offline) = {
            let mut state = self.state.lock();
            (state.failures.pop_front(), state.delay, state.offline)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if offline {
            return Err(NodeError::Unreachable("mock node offline".to_string()));
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainSource for MockChainSource {
    async fn tip(&self) -> Result<ChainTip, NodeError> {
        self.before_call().await?;
        let state = self.state.lock();
        Ok(match state.blocks.values().next_back() {
            Some(block) => ChainTip {
                height: block.height,
                hash: block.hash,
            },
            None => ChainTip {
                height: 0,
                hash: Self::mock_hash(0, 0),
            },
        })
    }

    async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, NodeError> {
        self.before_call().await?;
        if height == 0 {
            return Ok(Self::mock_hash(0, 0));
        }
        self.state
            .lock()
            .blocks
            .get(&height)
            .map(|b| b.hash)
            .ok_or(NodeError::BlockNotFound(height))
    }

    async fn block(&self, height: BlockHeight) -> Result<ChainBlock, NodeError> {
        self.before_call().await?;
        self.state
            .lock()
            .blocks
            .get(&height)
            .cloned()
            .ok_or(NodeError::BlockNotFound(height))
    }

    async fn node_version(&self) -> Result<String, NodeError> {
        self.before_call().await?;
        Ok(self.state.lock().version.clone())
    }
}
