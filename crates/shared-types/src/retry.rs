//! # Node Call Retry Policy
//!
//! Every node call is time-bounded. Transient failures are retried with
//! exponential backoff (doubling, capped) up to a fixed attempt budget.

use crate::errors::NodeError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout and backoff settings for node calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay.
    pub max_backoff_ms: u64,
    /// Per-attempt timeout.
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Policy for tests (tiny delays).
    pub fn for_testing() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            call_timeout_ms: 1_000,
        }
    }

    /// Per-attempt timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Run `op` once under the call timeout. Used for non-idempotent calls
    /// such as payout submission.
    pub async fn run_once<T, Fut>(&self, op: Fut) -> Result<T, NodeError>
    where
        Fut: Future<Output = Result<T, NodeError>>,
    {
        match tokio::time::timeout(self.call_timeout(), op).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout(self.call_timeout_ms)),
        }
    }

    /// Run an idempotent node call with timeout and bounded retry.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, NodeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.run_once(op()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        "Node call {} failed (attempt {}/{}): {}; retrying in {:?}",
                        op_name,
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
