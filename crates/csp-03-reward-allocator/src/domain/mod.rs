//! # Domain Module
//!
//! Pure reward allocation.

pub mod allocation;
pub mod errors;

pub use allocation::{allocate, Allocation, FeePolicy};
pub use errors::AllocatorError;
