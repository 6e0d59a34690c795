//! # Shared Types Crate
//!
//! Domain primitives shared by every pool subsystem.
//!
//! ## Design Principles
//!
//! - **Integer money**: every amount is a `u64` count of minor units
//!   ([`COIN`] per whole coin). No floating point touches the ledger.
//! - **Single error taxonomy for the node**: all outbound node ports return
//!   [`NodeError`], so retry and alerting decisions are made in one place.
//! - **Time-bounded node calls**: [`RetryPolicy`] wraps every node call in a
//!   timeout with bounded exponential backoff.

pub mod entities;
pub mod errors;
pub mod health;
pub mod parameters;
pub mod retry;

pub use entities::*;
pub use errors::*;
pub use health::{HealthMonitor, HealthState};
pub use parameters::{ParameterError, ParameterSchedule, PoolParameters, BPS_DENOMINATOR};
pub use retry::RetryPolicy;
