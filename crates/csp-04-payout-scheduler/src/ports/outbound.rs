//! # Outbound Ports
//!
//! Payout transaction issuance through the node's reward wallet.

use async_trait::async_trait;
use csp_02_participant_ledger::{PayoutBatch, PayoutEntry};
use parking_lot::Mutex;
use shared_types::{NodeError, TxId};
use std::collections::{HashMap, VecDeque};

/// What the node knows about a payout transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// The wallet has no such transaction.
    Unknown,
    /// Known, with this many confirmations (0 = in mempool).
    Confirmations(u32),
    /// Double-spent or otherwise in conflict with the best chain.
    Conflicted,
}

/// Payout transaction issuance.
///
/// Production: `GhostRpcClient` (pool-runtime/adapters/ghost_rpc.rs)
/// Testing: [`MockPayoutTransport`]
#[async_trait]
pub trait PayoutTransport: Send + Sync {
    /// Send one transaction paying every entry of `batch`. The transaction
    /// carries `batch.comment()` so it can be found again.
    async fn send_payout(&self, batch: &PayoutBatch) -> Result<TxId, NodeError>;

    /// Current status of a payout transaction.
    async fn tx_status(&self, txid: &TxId) -> Result<TxStatus, NodeError>;

    /// Locate the transaction sent for `batch_id`, if the node has one.
    async fn find_payout(&self, batch_id: u64) -> Result<Option<TxId>, NodeError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Scripted behaviour of one `send_payout` call.
#[derive(Clone, Debug)]
pub enum SendBehaviour {
    /// Node accepts and answers.
    Accept,
    /// Node refuses (or is unreachable); nothing is sent.
    Fail(NodeError),
    /// Node sends the transaction but the answer is lost.
    AcceptThenTimeout,
}

/// A transaction the mock node accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPayout {
    pub batch_id: u64,
    pub txid: TxId,
    pub entries: Vec<PayoutEntry>,
}

#[derive(Default)]
struct TransportState {
    script: VecDeque<SendBehaviour>,
    query_failures: VecDeque<NodeError>,
    sent: Vec<SentPayout>,
    statuses: HashMap<TxId, TxStatus>,
    send_attempts: u64,
}

/// In-memory payout transport.
///
/// Sends follow the script (default: accept). Accepted transactions report
/// `Confirmations(0)` until [`MockPayoutTransport::set_status`] says otherwise.
#[derive(Default)]
pub struct MockPayoutTransport {
    state: Mutex<TransportState>,
}

impl MockPayoutTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behaviours for the next `send_payout` calls.
    pub fn script_sends(&self, behaviours: impl IntoIterator<Item = SendBehaviour>) {
        self.state.lock().script.extend(behaviours);
    }

    /// Make the next `tx_status`/`find_payout` calls fail.
    pub fn fail_queries(&self, errors: impl IntoIterator<Item = NodeError>) {
        self.state.lock().query_failures.extend(errors);
    }

    /// Override the status of a transaction.
    pub fn set_status(&self, txid: &TxId, status: TxStatus) {
        self.state.lock().statuses.insert(txid.clone(), status);
    }

    /// Mark every accepted transaction with `n` confirmations.
    pub fn confirm_all(&self, n: u32) {
        let mut state = self.state.lock();
        let txids: Vec<TxId> = state.sent.iter().map(|s| s.txid.clone()).collect();
        for txid in txids {
            state.statuses.insert(txid, TxStatus::Confirmations(n));
        }
    }

    /// Transactions accepted so far.
    pub fn sent(&self) -> Vec<SentPayout> {
        self.state.lock().sent.clone()
    }

    /// Number of `send_payout` calls, including failed ones.
    pub fn send_attempts(&self) -> u64 {
        self.state.lock().send_attempts
    }

    /// Txid of the transaction sent for a batch.
    pub fn txid_for(&self, batch_id: u64) -> Option<TxId> {
        self.state
            .lock()
            .sent
            .iter()
            .find(|s| s.batch_id == batch_id)
            .map(|s| s.txid.clone())
    }

    fn accept(state: &mut TransportState, batch: &PayoutBatch) -> TxId {
        let txid = TxId::new(format!("{:064x}", 0xc0ffee_u64 + batch.id));
        state.sent.push(SentPayout {
            batch_id: batch.id,
            txid: txid.clone(),
            entries: batch.entries.clone(),
        });
        txid
    }
}

#[async_trait]
impl PayoutTransport for MockPayoutTransport {
    async fn send_payout(&self, batch: &PayoutBatch) -> Result<TxId, NodeError> {
        let mut state = self.state.lock();
        state.send_attempts += 1;
        match state.script.pop_front().unwrap_or(SendBehaviour::Accept) {
            SendBehaviour::Accept => Ok(Self::accept(&mut state, batch)),
            SendBehaviour::Fail(err) => Err(err),
            SendBehaviour::AcceptThenTimeout => {
                Self::accept(&mut state, batch);
                Err(NodeError::Timeout(0))
            }
        }
    }

    async fn tx_status(&self, txid: &TxId) -> Result<TxStatus, NodeError> {
        let mut state = self.state.lock();
        if let Some(err) = state.query_failures.pop_front() {
            return Err(err);
        }
        if let Some(status) = state.statuses.get(txid) {
            return Ok(*status);
        }
        Ok(if state.sent.iter().any(|s| &s.txid == txid) {
            TxStatus::Confirmations(0)
        } else {
            TxStatus::Unknown
        })
    }

    async fn find_payout(&self, batch_id: u64) -> Result<Option<TxId>, NodeError> {
        let mut state = self.state.lock();
        if let Some(err) = state.query_failures.pop_front() {
            return Err(err);
        }
        Ok(state
            .sent
            .iter()
            .find(|s| s.batch_id == batch_id)
            .map(|s| s.txid.clone()))
    }
}
