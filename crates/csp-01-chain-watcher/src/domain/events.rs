//! Events produced by the watcher.

use shared_types::{BlockHeight, ChainBlock};

/// One step of the chain event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// A confirmed block extending the cursor.
    Block(ChainBlock),
    /// The block at `height` (the cursor) is no longer on the best chain.
    Reorg {
        /// Height of the invalidated block.
        height: BlockHeight,
    },
}

impl ChainEvent {
    pub fn height(&self) -> BlockHeight {
        match self {
            ChainEvent::Block(block) => block.height,
            ChainEvent::Reorg { height } => *height,
        }
    }
}
