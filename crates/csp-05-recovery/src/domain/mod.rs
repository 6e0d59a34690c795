//! # Domain Module

pub mod config;
pub mod errors;
pub mod outcome;

pub use config::RecoveryConfig;
pub use errors::RecoveryError;
pub use outcome::{BatchRecovery, ChainReconciliation, StartupReport};
