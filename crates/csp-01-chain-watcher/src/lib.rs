//! # Chain Watcher (csp-01)
//!
//! Follows the node's best chain and produces an ordered stream of
//! confirmed blocks for the Reward Allocator.
//!
//! ## Behaviour
//!
//! | ID | Rule | Description |
//! |----|------|-------------|
//! | 1 | Ordered | Blocks are emitted by strictly increasing height |
//! | 2 | Confirmed | A block is emitted once `min_confirmations` deep |
//! | 3 | Linked | A block whose parent is not the cursor yields `Reorg` instead |
//! | 4 | Restartable | The cursor is the consumer's processed-height marker |
//! | 5 | Never gives up | Node errors are retried; the poll loop only stops on shutdown |
//!
//! ## Usage
//!
//! ```ignore
//! let mut watcher = ChainWatcher::new(source, WatcherConfig::default(), health, ledger.marker()?);
//! while let Some(event) = watcher.next_event().await? {
//!     // apply event, then watcher.reset_to(ledger.marker()?)
//! }
//! ```

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{ChainEvent, WatcherConfig, WatcherError};
pub use ports::outbound::{ChainEventHandler, ChainSource, MockChainSource, MOCK_NODE_VERSION};
pub use service::ChainWatcher;
