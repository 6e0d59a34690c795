//! # Handlers
//!
//! - `chain_events` - Applies watcher events to the ledger

pub mod chain_events;

pub use chain_events::PoolEventHandler;
