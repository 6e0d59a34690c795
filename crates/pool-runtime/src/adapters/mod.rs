//! # Adapters
//!
//! - `ghost_rpc` - Ghost node JSON-RPC (chain source and payout transport)
//! - `storage` - Ledger storage backends

pub mod ghost_rpc;
pub mod storage;

pub use ghost_rpc::{GhostRpcClient, GhostRpcConfig, RpcAuth, REWARD_WALLET, STAKE_WALLET};
pub use storage::open_ledger_store;
