//! Recovery configuration.

use shared_types::RetryPolicy;

/// Recovery configuration.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    /// Confirmations before a submitted batch counts as confirmed.
    pub payout_confirmations: u32,
    /// Deepest reorg rolled back without operator involvement.
    pub max_reorg_depth: u64,
    /// Timeout and backoff for node calls.
    pub retry: RetryPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            payout_confirmations: 10,
            max_reorg_depth: 1_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RecoveryConfig {
    pub fn for_testing() -> Self {
        Self {
            payout_confirmations: 2,
            max_reorg_depth: 50,
            retry: RetryPolicy::for_testing(),
        }
    }
}
