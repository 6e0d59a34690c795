//! # Domain Module
//!
//! Scheduler configuration, errors and batch planning.

pub mod config;
pub mod errors;
pub mod planning;

pub use config::SchedulerConfig;
pub use errors::SchedulerError;
pub use planning::{is_eligible, plan_batches};
