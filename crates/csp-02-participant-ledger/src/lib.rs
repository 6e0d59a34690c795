//! # Participant Ledger (csp-02)
//!
//! The Participant Ledger is the only mutable state of the pool. It tracks
//! each participant's stake and unpaid rewards, the operator fee balance,
//! the payout batches and the processed-height marker.
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Description |
//! |----|-----------|-------------|
//! | 1 | Atomic Mutations | Each operation commits one all-or-nothing batch |
//! | 2 | Sequential Blocks | A block commits only at `marker + 1` on top of the marker hash |
//! | 3 | Exactly Once | A reward event is applied at most once per block hash |
//! | 4 | Conservation | Credits plus operator fee equal the block reward |
//! | 5 | Monotonic Rewards | Unpaid balances only drop through payouts or journaled reorg reversal |
//! | 6 | Halt on Corruption | Undecodable or inconsistent state refuses further mutations |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Entities, errors and the storage key layout
//! - `ports/` - The `KeyValueStore` port and its in-memory and file-backed stores
//! - `service.rs` - `ParticipantLedger`
//!
//! ## Usage
//!
//! ```ignore
//! use csp_02_participant_ledger::{InMemoryKVStore, ParticipantLedger};
//!
//! let ledger = ParticipantLedger::new(Box::new(InMemoryKVStore::new()));
//! ledger.commit_block(commit)?;
//! let snapshot = ledger.snapshot(next_height)?;
//! ```

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::entities::{
    AppliedBlock, BatchStatus, BlockCommit, Credit, LedgerSnapshot, LedgerStats, Participant,
    PayoutBatch, PayoutEntry,
};
pub use domain::errors::{KVStoreError, LedgerError};
pub use ports::outbound::{BatchOperation, FileBackedKVStore, InMemoryKVStore, KeyValueStore};
pub use service::{ParticipantLedger, DEFAULT_JOURNAL_DEPTH};
