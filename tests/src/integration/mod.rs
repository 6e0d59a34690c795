//! # Integration Scenarios
//!
//! Every scenario drives the real subsystems against the mock node
//! (`MockChainSource`, `MockPayoutTransport`).
//!
//! 1. **allocation_flow**: reward splits, fee schedule, idempotency
//! 2. **reorg_flow**: rollback of credits, reward debt after payouts
//! 3. **payout_flow**: pay, confirm, failure and lost answers
//! 4. **recovery_flow**: restarts from the on-disk ledger
//! 5. **observer_mode**: accounting without payouts

#[cfg(test)]
pub mod fixtures;

#[cfg(test)]
mod allocation_flow;
#[cfg(test)]
mod observer_mode;
#[cfg(test)]
mod payout_flow;
#[cfg(test)]
mod recovery_flow;
#[cfg(test)]
mod reorg_flow;
