//! # Reward Allocator (csp-03)
//!
//! Splits each stake reward proportionally to the stakes held before the
//! rewarded block and commits the result to the Participant Ledger exactly
//! once.
//!
//! ## Crate Structure
//!
//! - `domain/allocation.rs` - pure `allocate(event, snapshot, policy)`
//! - `service.rs` - `RewardAllocator::apply(block)`: idempotency check,
//!   snapshot, allocation and a single ledger commit

pub mod domain;
pub mod service;

pub use domain::{allocate, Allocation, AllocatorError, FeePolicy};
pub use service::{ApplyOutcome, RewardAllocator};
