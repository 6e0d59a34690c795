//! # Domain Module
//!
//! Configuration, events and errors of the Chain Watcher.

pub mod config;
pub mod errors;
pub mod events;

pub use config::WatcherConfig;
pub use errors::WatcherError;
pub use events::ChainEvent;
