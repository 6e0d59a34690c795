//! # Pool Runtime Library
//!
//! Exposes the runtime's modules for testing. The entry point is the
//! `coldstakepool` binary in `main.rs`.
//!
//! - `cli` - Command line
//! - `settings` - `stakepool.json`
//! - `adapters/` - Ghost JSON-RPC client and ledger storage backends
//! - `handlers/` - Chain event handler feeding the ledger
//! - `status` - Status document cache
//! - `runtime` - Task wiring and lifecycle

pub mod adapters;
pub mod cli;
pub mod handlers;
pub mod runtime;
pub mod settings;
pub mod status;

pub use cli::{Cli, Network};
pub use runtime::{PoolRuntime, RuntimeConfig};
pub use settings::{PoolMode, PoolSettings, SettingsError};
pub use status::{StatusCache, StatusDocument};
