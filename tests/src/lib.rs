//! # Cold-Stake Pool Test Suite
//!
//! ```text
//! tests/
//! ├── benches/          # Allocation and ledger throughput
//! └── src/integration/  # Watcher → allocator → ledger → scheduler scenarios
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p csp-tests
//! cargo test -p csp-tests integration::reorg_flow
//! cargo bench -p csp-tests
//! ```

pub mod integration;
