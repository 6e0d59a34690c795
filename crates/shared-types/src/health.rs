//! Pool health monitor
//!
//! Repeated node failures degrade the pool instead of crashing it. A corrupt
//! ledger halts it until an operator intervenes.
//!
//! State Machine:
//! ```text
//! [HEALTHY] ──node failure──→ [HEALTHY {failures: n}]
//!     ↑                              │
//!     │                              └── n >= degrade_after ──→ [DEGRADED]
//!     │                                                              │
//!     └──────────────────── node success ────────────────────────────┘
//!
//! any state ──corrupt ledger──→ [HALTED] ──manual intervention──→ [HEALTHY]
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Health as reported on the status document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    /// Normal operation.
    #[default]
    Healthy,
    /// Node calls keep failing after their retry budget.
    Degraded {
        /// Failures since the last successful node call.
        consecutive_failures: u32,
    },
    /// Ledger mutations stopped; requires manual resolution.
    Halted {
        /// Why the pool halted.
        reason: String,
    },
}

#[derive(Debug, Default)]
struct HealthInner {
    state: HealthState,
    consecutive_failures: u32,
    intervention_count: u64,
}

/// Thread-safe health monitor shared by the pool tasks.
#[derive(Debug)]
pub struct HealthMonitor {
    inner: RwLock<HealthInner>,
    degrade_after: u32,
}

impl HealthMonitor {
    /// Create a monitor that degrades after `degrade_after` consecutive
    /// failed node operations.
    pub fn new(degrade_after: u32) -> Self {
        Self {
            inner: RwLock::new(HealthInner::default()),
            degrade_after: degrade_after.max(1),
        }
    }

    /// Current state.
    pub fn state(&self) -> HealthState {
        self.inner.read().state.clone()
    }

    /// Whether ledger mutations are stopped.
    pub fn is_halted(&self) -> bool {
        matches!(self.inner.read().state, HealthState::Halted { .. })
    }

    /// Whether the pool is degraded.
    pub fn is_degraded(&self) -> bool {
        matches!(self.inner.read().state, HealthState::Degraded { .. })
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read().consecutive_failures
    }

    /// Record a successful node operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.consecutive_failures = 0;
        if let HealthState::Degraded { .. } = inner.state {
            info!("Node reachable again, pool health restored");
            inner.state = HealthState::Healthy;
        }
    }

    /// Record a node operation that failed after its retry budget.
    pub fn record_failure(&self, what: &str) -> HealthState {
        let mut inner = self.inner.write();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if matches!(inner.state, HealthState::Halted { .. }) {
            return inner.state.clone();
        }
        if inner.consecutive_failures >= self.degrade_after {
            if !matches!(inner.state, HealthState::Degraded { .. }) {
                warn!(
                    "Pool degraded after {} consecutive node failures (last: {})",
                    inner.consecutive_failures, what
                );
            }
            inner.state = HealthState::Degraded {
                consecutive_failures: inner.consecutive_failures,
            };
        }
        inner.state.clone()
    }

    /// Halt ledger mutations.
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Pool halted: {}", reason);
        self.inner.write().state = HealthState::Halted { reason };
    }

    /// Operator cleared the halt.
    pub fn manual_intervention(&self) {
        let mut inner = self.inner.write();
        inner.intervention_count += 1;
        inner.consecutive_failures = 0;
        inner.state = HealthState::Healthy;
    }

    /// Number of manual interventions.
    pub fn intervention_count(&self) -> u64 {
        self.inner.read().intervention_count
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(3)
    }
}
