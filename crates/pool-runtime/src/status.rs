//! # Status Cache
//!
//! The status document served to operators and participants:
//!
//! ```json
//! { "core": "/Ghost:0.21.1.7/", "pool": "0.1.0", "mode": "master",
//!   "health": { "state": "healthy" }, "chain_height": 812345,
//!   "ledger": { "marker_height": 812245, ... } }
//! ```
//!
//! Readers never touch the node or the ledger; they get the last refreshed
//! copy. The document is also written to `status.json` in the pool
//! directory for an external HTTP server to pick up.

use crate::settings::PoolMode;
use csp_02_participant_ledger::{LedgerStats, ParticipantLedger};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_types::{BlockHeight, HealthMonitor, HealthState};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// File the document is persisted to inside the pool directory.
pub const STATUS_FILE: &str = "status.json";

/// Snapshot of the pool's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    /// Node version string, once known.
    pub core: Option<String>,
    /// Engine version.
    pub pool: String,
    pub mode: PoolMode,
    pub health: HealthState,
    /// Node's best height at the last successful query.
    pub chain_height: Option<BlockHeight>,
    pub ledger: LedgerStats,
}

/// Process-wide cache of the [`StatusDocument`].
pub struct StatusCache {
    document: RwLock<StatusDocument>,
}

impl StatusCache {
    pub fn new(mode: PoolMode) -> Self {
        Self {
            document: RwLock::new(StatusDocument {
                core: None,
                pool: env!("CARGO_PKG_VERSION").to_string(),
                mode,
                health: HealthState::Healthy,
                chain_height: None,
                ledger: LedgerStats::default(),
            }),
        }
    }

    /// Record the node version; returns whether it changed.
    pub fn set_core(&self, version: impl Into<String>) -> bool {
        let version = version.into();
        let mut document = self.document.write();
        if document.core.as_deref() == Some(version.as_str()) {
            return false;
        }
        document.core = Some(version);
        true
    }

    /// Record a successful tip query.
    pub fn record_chain_height(&self, height: BlockHeight) {
        self.document.write().chain_height = Some(height);
    }

    /// Pull health and ledger figures. Ledger reads keep working while the
    /// ledger is halted; a failed read keeps the previous figures.
    pub fn refresh(&self, ledger: &ParticipantLedger, health: &HealthMonitor) {
        let stats = match ledger.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Status refresh could not read the ledger: {}", e);
                None
            }
        };
        let mut document = self.document.write();
        document.health = health.state();
        if let Some(stats) = stats {
            document.ledger = stats;
        }
    }

    pub fn document(&self) -> StatusDocument {
        self.document.read().clone()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.document.read())
    }

    /// Write the document to `<pool_dir>/status.json` (temp file + rename).
    pub fn persist(&self, pool_dir: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let path = pool_dir.join(STATUS_FILE);
        let temp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&temp, &path)
    }
}
