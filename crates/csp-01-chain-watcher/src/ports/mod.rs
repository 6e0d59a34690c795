//! # Ports Layer
//!
//! The watcher only has driven ports: the node it reads and the consumer it
//! feeds.

pub mod outbound;

pub use outbound::*;
