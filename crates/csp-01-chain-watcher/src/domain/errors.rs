//! Watcher errors.

use shared_types::NodeError;
use thiserror::Error;

/// Chain Watcher errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatcherError {
    /// Node call failed after retries.
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// The event consumer failed.
    #[error("Event handler failed: {0}")]
    Handler(String),
}
