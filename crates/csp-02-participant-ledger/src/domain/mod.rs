//! # Domain Module
//!
//! Core domain types for the Participant Ledger.

pub mod entities;
pub mod errors;
pub mod keys;

pub use entities::*;
pub use errors::*;
