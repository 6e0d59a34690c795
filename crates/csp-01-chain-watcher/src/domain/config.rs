//! Watcher configuration.

use shared_types::{BlockHeight, RetryPolicy};
use std::time::Duration;

/// Chain Watcher configuration.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Delay between polls of the node once caught up.
    pub poll_interval_ms: u64,
    /// Depth a block must reach before it is emitted (1 = the tip itself).
    pub min_confirmations: u64,
    /// First height the pool tracks.
    pub start_height: BlockHeight,
    /// Timeout and backoff for node calls.
    pub retry: RetryPolicy,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            min_confirmations: 100,
            start_height: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl WatcherConfig {
    /// Fast polling, no confirmation depth.
    pub fn for_testing() -> Self {
        Self {
            poll_interval_ms: 5,
            min_confirmations: 1,
            start_height: 1,
            retry: RetryPolicy::for_testing(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Highest height that is deep enough under `tip`.
    pub fn confirmed_height(&self, tip: BlockHeight) -> Option<BlockHeight> {
        let depth = self.min_confirmations.max(1) - 1;
        tip.checked_sub(depth)
    }
}
