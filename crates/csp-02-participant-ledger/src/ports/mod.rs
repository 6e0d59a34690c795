//! # Ports Layer
//!
//! Outbound storage port for the Participant Ledger.

pub mod outbound;

pub use outbound::*;
