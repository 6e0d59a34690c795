//! Scheduler configuration.

use shared_types::RetryPolicy;
use std::time::Duration;

/// Payout Scheduler configuration.
///
/// Thresholds that change over time (payout threshold, minimum output,
/// blocks between payments) come from the pool's parameter schedule.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Delay between payout rounds.
    pub payout_interval_ms: u64,
    /// Maximum outputs in one payout transaction.
    pub max_outputs_per_tx: usize,
    /// Confirmations before a submitted batch counts as confirmed.
    pub payout_confirmations: u32,
    /// Blocks a batch may stay submitted before it is flagged for review.
    pub review_after_blocks: u64,
    /// Timeout and backoff for node calls.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            payout_interval_ms: 60_000,
            max_outputs_per_tx: 100,
            payout_confirmations: 10,
            review_after_blocks: 720,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn for_testing() -> Self {
        Self {
            payout_interval_ms: 5,
            max_outputs_per_tx: 10,
            payout_confirmations: 2,
            review_after_blocks: 20,
            retry: RetryPolicy::for_testing(),
        }
    }

    pub fn payout_interval(&self) -> Duration {
        Duration::from_millis(self.payout_interval_ms)
    }
}
