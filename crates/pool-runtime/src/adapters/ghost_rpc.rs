//! # Ghost JSON-RPC Adapter
//!
//! Implements the watcher's [`ChainSource`] and the scheduler's
//! [`PayoutTransport`] against a Ghost node.
//!
//! ## Wallets
//!
//! - `pool_stake` holds the stake-only key the participants delegate to
//! - `pool_reward` receives stake rewards and sends payouts
//!
//! ## Error classification
//!
//! | Failure | `NodeError` |
//! |---------|-------------|
//! | connection refused, bad credentials, node warming up (-28) | `Unreachable` |
//! | no answer within the timeout | `Timeout` |
//! | send: -4 / -6 | `InsufficientFunds` |
//! | send: -3 / -5 / -25 / -26, any other RPC error | `TransactionRejected` |
//! | `getblockhash` out of range (-8) | `BlockNotFound` |
//! | unparsable answer | `Protocol` |

use async_trait::async_trait;
use csp_01_chain_watcher::ChainSource;
use csp_02_participant_ledger::PayoutBatch;
use csp_04_payout_scheduler::{PayoutTransport, TxStatus};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::{
    coins_to_amount, format_coins, Amount, BlockHash, BlockHeight, ChainBlock, ChainTip,
    NodeError, ParticipantId, StakeChange, TxId,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Wallet holding the pool's stake-only key.
pub const STAKE_WALLET: &str = "pool_stake";
/// Wallet receiving rewards and sending payouts.
pub const REWARD_WALLET: &str = "pool_reward";

/// RPC credentials.
#[derive(Clone)]
pub struct RpcAuth {
    pub user: String,
    pub password: String,
}

impl RpcAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Read the node's `.cookie` file (`__cookie__:<password>`).
    pub fn from_cookie(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match text.trim().split_once(':') {
            Some((user, password)) => Ok(Self::new(user, password)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not an RPC cookie", path.display()),
            )),
        }
    }
}

impl std::fmt::Debug for RpcAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RpcAuth({}:***)", self.user)
    }
}

/// Connection settings for [`GhostRpcClient`].
#[derive(Clone, Debug)]
pub struct GhostRpcConfig {
    /// `http://host:port`
    pub url: String,
    pub auth: RpcAuth,
    /// HTTP-level timeout; the retry policy applies its own per call.
    pub timeout: Duration,
    /// Stake-only address the pool's cold-stake outputs delegate to.
    pub pool_address: String,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Error object of a JSON-RPC answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

/// Node is still loading the block index or wallet.
const RPC_IN_WARMUP: i64 = -28;
const RPC_INVALID_PARAMETER: i64 = -8;
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

enum CallError {
    Node(NodeError),
    Rpc(JsonRpcError),
}

impl CallError {
    /// Classification for calls without method-specific codes.
    fn into_node_error(self) -> NodeError {
        match self {
            CallError::Node(e) => e,
            CallError::Rpc(e) if e.code == RPC_IN_WARMUP => NodeError::Unreachable(e.to_string()),
            CallError::Rpc(e) => NodeError::Protocol(e.to_string()),
        }
    }
}

/// Classify an RPC error returned by a payout send.
pub fn classify_send_error(err: &JsonRpcError) -> NodeError {
    match err.code {
        RPC_IN_WARMUP => NodeError::Unreachable(err.to_string()),
        -4 | -6 => NodeError::InsufficientFunds(err.message.clone()),
        _ => NodeError::TransactionRejected(format!("{} ({})", err.message, err.code)),
    }
}

// =============================================================================
// Node answers
// =============================================================================

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    blocks: BlockHeight,
    bestblockhash: String,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    subversion: String,
}

/// Output script as decoded by the node.
#[derive(Debug, Default, Deserialize)]
pub struct RpcScript {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Set on cold-stake scripts: the key allowed to stake the output.
    #[serde(default)]
    pub stakeaddresses: Vec<String>,
}

impl RpcScript {
    fn spend_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or_else(|| self.addresses.first().map(String::as_str))
    }

    fn delegates_to(&self, pool_address: &str) -> bool {
        self.stakeaddresses.iter().any(|a| a == pool_address)
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcPrevout {
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script: RpcScript,
}

#[derive(Debug, Deserialize)]
pub struct RpcVin {
    /// Present at `getblock` verbosity 3.
    #[serde(default)]
    pub prevout: Option<RpcPrevout>,
}

#[derive(Debug, Deserialize)]
pub struct RpcVout {
    #[serde(default)]
    pub value: f64,
    #[serde(rename = "scriptPubKey", default)]
    pub script: RpcScript,
}

#[derive(Debug, Deserialize)]
pub struct RpcTx {
    #[serde(default)]
    pub vin: Vec<RpcVin>,
    #[serde(default)]
    pub vout: Vec<RpcVout>,
}

#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub height: BlockHeight,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    pub time: u64,
    #[serde(default)]
    pub tx: Vec<RpcTx>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcBlockReward {
    /// Block the record was read from.
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub stakereward: Option<f64>,
    #[serde(default)]
    pub kernelscript: Option<RpcScript>,
}

#[derive(Debug, Deserialize)]
struct RpcWalletTx {
    confirmations: i64,
}

#[derive(Debug, Deserialize)]
struct RpcFilteredTx {
    txid: String,
    #[serde(default)]
    comment: Option<String>,
}

fn parse_hash(hex: &str) -> Result<BlockHash, NodeError> {
    BlockHash::from_hex(hex).map_err(|e| NodeError::Protocol(format!("bad block hash {}: {}", hex, e)))
}

fn parse_amount(coins: f64) -> Result<Amount, NodeError> {
    coins_to_amount(coins).ok_or_else(|| NodeError::Protocol(format!("bad amount {}", coins)))
}

/// Reduce a verbose block and its reward record to pool activity.
///
/// Spent outputs that delegated to the pool are withdrawals of their spend
/// address; created ones are deposits. Withdrawals of a transaction are
/// listed before its deposits, so a restake nets to zero.
pub fn to_chain_block(
    block: RpcBlock,
    reward: RpcBlockReward,
    pool_address: &str,
) -> Result<ChainBlock, NodeError> {
    let prev_hash = match &block.previousblockhash {
        Some(hex) => parse_hash(hex)?,
        None => BlockHash::ZERO,
    };
    let mut chain_block = ChainBlock::empty(block.height, parse_hash(&block.hash)?, prev_hash, block.time);

    for tx in &block.tx {
        for vin in &tx.vin {
            let prevout = match &vin.prevout {
                Some(p) if p.script.delegates_to(pool_address) => p,
                _ => continue,
            };
            if let Some(owner) = prevout.script.spend_address() {
                chain_block
                    .stake_changes
                    .push(StakeChange::withdrawal(owner, parse_amount(prevout.value)?));
            }
        }
        for vout in &tx.vout {
            if !vout.script.delegates_to(pool_address) {
                continue;
            }
            if let Some(owner) = vout.script.spend_address() {
                chain_block
                    .stake_changes
                    .push(StakeChange::deposit(owner, parse_amount(vout.value)?));
            }
        }
    }

    if let Some(kernel) = &reward.kernelscript {
        if kernel.delegates_to(pool_address) {
            let amount = parse_amount(reward.stakereward.unwrap_or(0.0))?;
            if amount > 0 {
                chain_block.reward = Some(amount);
                chain_block.staker = kernel.spend_address().map(ParticipantId::new);
            }
        }
    }
    Ok(chain_block)
}

fn coin_value(amount: Amount) -> Result<Value, NodeError> {
    serde_json::Number::from_str(&format_coins(amount))
        .map(Value::Number)
        .map_err(|e| NodeError::Protocol(format!("cannot encode amount {}: {}", amount, e)))
}

// =============================================================================
// Client
// =============================================================================

/// JSON-RPC client for a Ghost node.
pub struct GhostRpcClient {
    client: Client,
    config: GhostRpcConfig,
    request_id: AtomicU64,
}

impl GhostRpcClient {
    pub fn new(config: GhostRpcConfig) -> Result<Self, NodeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| NodeError::Protocol(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        wallet: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<T, CallError> {
        let url = match wallet {
            Some(wallet) => format!("{}/wallet/{}", self.config.url, wallet),
            None => self.config.url.clone(),
        };
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: self.next_id(),
            method,
            params,
        };
        trace!("RPC {} {}", method, request.params);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.auth.user, Some(&self.config.auth.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::Node(self.transport_error(e)))?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(CallError::Node(NodeError::Unreachable(format!(
                "{} rejected the RPC credentials",
                self.config.url
            ))));
        }

        // RPC errors arrive with HTTP 500 and a JSON body.
        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| CallError::Node(self.transport_error(e)))?;
        if let Some(error) = body.error {
            debug!("RPC {} failed: {}", method, error);
            return Err(CallError::Rpc(error));
        }
        body.result
            .ok_or_else(|| CallError::Node(NodeError::Protocol(format!("{} returned no result", method))))
    }

    fn transport_error(&self, e: reqwest::Error) -> NodeError {
        if e.is_timeout() {
            NodeError::Timeout(self.config.timeout.as_millis() as u64)
        } else if e.is_connect() {
            NodeError::Unreachable(format!("cannot connect to {}: {}", self.config.url, e))
        } else {
            NodeError::Protocol(e.to_string())
        }
    }
}

#[async_trait]
impl ChainSource for GhostRpcClient {
    async fn tip(&self) -> Result<ChainTip, NodeError> {
        let info: BlockchainInfo = self
            .call(None, "getblockchaininfo", json!([]))
            .await
            .map_err(CallError::into_node_error)?;
        Ok(ChainTip {
            height: info.blocks,
            hash: parse_hash(&info.bestblockhash)?,
        })
    }

    async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, NodeError> {
        match self.call::<String>(None, "getblockhash", json!([height])).await {
            Ok(hex) => parse_hash(&hex),
            Err(CallError::Rpc(e)) if e.code == RPC_INVALID_PARAMETER => {
                Err(NodeError::BlockNotFound(height))
            }
            Err(e) => Err(e.into_node_error()),
        }
    }

    async fn block(&self, height: BlockHeight) -> Result<ChainBlock, NodeError> {
        let hash = self.block_hash(height).await?;
        let block: RpcBlock = self
            .call(None, "getblock", json!([hash.to_hex(), 3]))
            .await
            .map_err(CallError::into_node_error)?;
        let reward: RpcBlockReward = self
            .call(None, "getblockreward", json!([height]))
            .await
            .map_err(CallError::into_node_error)?;
        // getblockreward goes by height; a reorg in between would pair the
        // block with another block's reward.
        match reward.blockhash.as_deref().map(parse_hash).transpose()? {
            Some(reward_hash) if reward_hash == hash => {}
            Some(reward_hash) => {
                return Err(NodeError::Protocol(format!(
                    "block {} at height {} changed to {} while it was read",
                    hash, height, reward_hash
                )))
            }
            None => {
                return Err(NodeError::Protocol(format!(
                    "getblockreward for height {} names no block",
                    height
                )))
            }
        }
        to_chain_block(block, reward, &self.config.pool_address)
    }

    async fn node_version(&self) -> Result<String, NodeError> {
        let info: NetworkInfo = self
            .call(None, "getnetworkinfo", json!([]))
            .await
            .map_err(CallError::into_node_error)?;
        Ok(info.subversion)
    }
}

#[async_trait]
impl PayoutTransport for GhostRpcClient {
    async fn send_payout(&self, batch: &PayoutBatch) -> Result<TxId, NodeError> {
        let outputs = batch
            .entries
            .iter()
            .map(|e| Ok(json!({ "address": e.participant.as_str(), "amount": coin_value(e.amount)? })))
            .collect::<Result<Vec<Value>, NodeError>>()?;
        let params = json!(["part", "part", outputs, batch.comment()]);
        match self.call::<String>(Some(REWARD_WALLET), "sendtypeto", params).await {
            Ok(txid) => Ok(TxId::new(txid)),
            Err(CallError::Rpc(e)) => Err(classify_send_error(&e)),
            Err(CallError::Node(e)) => Err(e),
        }
    }

    async fn tx_status(&self, txid: &TxId) -> Result<TxStatus, NodeError> {
        match self
            .call::<RpcWalletTx>(Some(REWARD_WALLET), "gettransaction", json!([txid.as_str()]))
            .await
        {
            Ok(tx) if tx.confirmations < 0 => Ok(TxStatus::Conflicted),
            Ok(tx) => Ok(TxStatus::Confirmations(
                u32::try_from(tx.confirmations).unwrap_or(u32::MAX),
            )),
            Err(CallError::Rpc(e)) if e.code == RPC_INVALID_ADDRESS_OR_KEY => Ok(TxStatus::Unknown),
            Err(e) => Err(e.into_node_error()),
        }
    }

    /// The node's `search` is a substring match over several fields, so
    /// `csp-batch-1` also hits `csp-batch-10` and transactions without a
    /// comment. Only an exact comment match counts.
    async fn find_payout(&self, batch_id: u64) -> Result<Option<TxId>, NodeError> {
        let comment = PayoutBatch::comment_for(batch_id);
        let found: Vec<RpcFilteredTx> = self
            .call(
                Some(REWARD_WALLET),
                "filtertransactions",
                json!([{ "count": 0, "search": comment }]),
            )
            .await
            .map_err(CallError::into_node_error)?;
        Ok(found
            .into_iter()
            .find(|tx| tx.comment.as_deref() == Some(comment.as_str()))
            .map(|tx| TxId::new(tx.txid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_02_participant_ledger::{BatchStatus, PayoutEntry};
    use shared_types::{StakeChangeKind, COIN};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const POOL: &str = "pcs1pool";

    fn block_json() -> Value {
        json!({
            "hash": format!("{:064x}", 7),
            "height": 7,
            "previousblockhash": format!("{:064x}", 6),
            "time": 1_700_000_000u64,
            "tx": [
                {
                    // Coinstake restaking alice's output.
                    "vin": [{ "prevout": { "value": 10.0, "scriptPubKey": { "addresses": ["alice"], "stakeaddresses": [POOL] } } }],
                    "vout": [
                        { "value": 10.0, "scriptPubKey": { "addresses": ["alice"], "stakeaddresses": [POOL] } },
                        { "value": 0.75, "scriptPubKey": { "address": "reward" } }
                    ]
                },
                {
                    // Bob joins, carol delegates elsewhere.
                    "vin": [{ "prevout": { "value": 3.5, "scriptPubKey": { "address": "bob" } } }],
                    "vout": [
                        { "value": 3.4999, "scriptPubKey": { "address": "bob", "stakeaddresses": [POOL] } },
                        { "value": 1.0, "scriptPubKey": { "address": "carol", "stakeaddresses": ["other"] } }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_block_reduced_to_pool_activity() {
        let block: RpcBlock = serde_json::from_value(block_json()).unwrap();
        let reward: RpcBlockReward = serde_json::from_value(json!({
            "stakereward": 0.75,
            "kernelscript": { "addresses": ["alice"], "stakeaddresses": [POOL] }
        }))
        .unwrap();

        let chain_block = to_chain_block(block, reward, POOL).unwrap();

        assert_eq!(chain_block.height, 7);
        assert_eq!(chain_block.prev_hash.to_hex(), format!("{:064x}", 6));
        assert_eq!(chain_block.reward, Some(75_000_000));
        assert_eq!(chain_block.staker, Some(ParticipantId::new("alice")));
        let changes: Vec<(StakeChangeKind, &str, u64)> = chain_block
            .stake_changes
            .iter()
            .map(|c| (c.kind, c.participant.as_str(), c.amount))
            .collect();
        assert_eq!(
            changes,
            vec![
                (StakeChangeKind::Withdrawal, "alice", 10 * COIN),
                (StakeChangeKind::Deposit, "alice", 10 * COIN),
                (StakeChangeKind::Deposit, "bob", 349_990_000),
            ]
        );
    }

    #[test]
    fn test_reward_of_foreign_staker_ignored() {
        let block: RpcBlock = serde_json::from_value(block_json()).unwrap();
        let reward: RpcBlockReward = serde_json::from_value(json!({
            "stakereward": 0.75,
            "kernelscript": { "addresses": ["solo"] }
        }))
        .unwrap();

        let chain_block = to_chain_block(block, reward, POOL).unwrap();
        assert_eq!(chain_block.reward, None);
        assert!(chain_block.reward_event().is_none());
    }

    #[test]
    fn test_send_error_classification() {
        let err = |code| JsonRpcError {
            code,
            message: "boom".to_string(),
        };
        assert!(matches!(classify_send_error(&err(-6)), NodeError::InsufficientFunds(_)));
        assert!(matches!(classify_send_error(&err(-4)), NodeError::InsufficientFunds(_)));
        assert!(matches!(classify_send_error(&err(-26)), NodeError::TransactionRejected(_)));
        assert!(matches!(classify_send_error(&err(-5)), NodeError::TransactionRejected(_)));
        assert!(matches!(classify_send_error(&err(-28)), NodeError::Unreachable(_)));
    }

    #[test]
    fn test_cookie_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cookie");
        std::fs::write(&path, "__cookie__:s3cret\n").unwrap();
        let auth = RpcAuth::from_cookie(&path).unwrap();
        assert_eq!(auth.user, "__cookie__");
        assert_eq!(auth.password, "s3cret");
        assert!(!format!("{:?}", auth).contains("s3cret"));
    }

    /// Minimal HTTP responder: answers each request with the next body.
    async fn fake_node(bodies: Vec<Value>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request);
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if request.len() >= end + 4 + length {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let body = body.to_string();
                let status = if body.contains("\"error\":null") { "200 OK" } else { "500 Internal Server Error" };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}", addr)
    }

    fn client(url: String) -> GhostRpcClient {
        GhostRpcClient::new(GhostRpcConfig {
            url,
            auth: RpcAuth::new("user", "pass"),
            timeout: Duration::from_secs(5),
            pool_address: POOL.to_string(),
        })
        .unwrap()
    }

    fn batch() -> PayoutBatch {
        PayoutBatch {
            id: 4,
            entries: vec![PayoutEntry::new(ParticipantId::new("alice"), COIN)],
            status: BatchStatus::Pending,
            created_height: 10,
            txid: None,
            submitted_height: None,
            review_flagged: false,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_tip_and_missing_block() {
        let url = fake_node(vec![
            json!({ "result": { "blocks": 12, "bestblockhash": format!("{:064x}", 12) }, "error": null, "id": 1 }),
            json!({ "result": null, "error": { "code": -8, "message": "Block height out of range" }, "id": 2 }),
        ])
        .await;
        let node = client(url);

        assert_eq!(node.tip().await.unwrap().height, 12);
        assert_eq!(node.block_hash(13).await.unwrap_err(), NodeError::BlockNotFound(13));
    }

    #[tokio::test]
    async fn test_payout_round_trip() {
        let txid = format!("{:064x}", 0xabc);
        let url = fake_node(vec![
            json!({ "result": txid, "error": null, "id": 1 }),
            json!({ "result": { "confirmations": 3 }, "error": null, "id": 2 }),
            json!({ "result": { "confirmations": -1 }, "error": null, "id": 3 }),
            json!({ "result": null, "error": { "code": -5, "message": "Invalid or non-wallet transaction id" }, "id": 4 }),
            json!({ "result": [{ "txid": txid, "comment": "csp-batch-4" }], "error": null, "id": 5 }),
        ])
        .await;
        let node = client(url);

        let sent = node.send_payout(&batch()).await.unwrap();
        assert_eq!(sent.as_str(), txid);
        assert_eq!(node.tx_status(&sent).await.unwrap(), TxStatus::Confirmations(3));
        assert_eq!(node.tx_status(&sent).await.unwrap(), TxStatus::Conflicted);
        assert_eq!(node.tx_status(&sent).await.unwrap(), TxStatus::Unknown);
        assert_eq!(node.find_payout(4).await.unwrap(), Some(sent));
    }

    #[tokio::test]
    async fn test_find_payout_needs_exact_comment() {
        let url = fake_node(vec![
            json!({
                "result": [
                    { "txid": "deadbeef" },
                    { "txid": "feed10", "comment": "csp-batch-10" }
                ],
                "error": null,
                "id": 1
            }),
            json!({
                "result": [
                    { "txid": "feed10", "comment": "csp-batch-10" },
                    { "txid": "feed01", "comment": "csp-batch-1" }
                ],
                "error": null,
                "id": 2
            }),
        ])
        .await;
        let node = client(url);

        assert_eq!(node.find_payout(1).await.unwrap(), None);
        assert_eq!(node.find_payout(1).await.unwrap(), Some(TxId::new("feed01")));
    }

    fn block_hash_json(n: u64) -> Value {
        json!({ "result": format!("{:064x}", n), "error": null, "id": 1 })
    }

    fn reward_json(blockhash: u64) -> Value {
        json!({
            "result": {
                "blockhash": format!("{:064x}", blockhash),
                "stakereward": 0.75,
                "kernelscript": { "addresses": ["alice"], "stakeaddresses": [POOL] }
            },
            "error": null,
            "id": 3
        })
    }

    #[tokio::test]
    async fn test_block_reads_reward_of_same_block() {
        let url = fake_node(vec![
            block_hash_json(7),
            json!({ "result": block_json(), "error": null, "id": 2 }),
            reward_json(7),
        ])
        .await;

        let block = client(url).block(7).await.unwrap();
        assert_eq!(block.reward, Some(75_000_000));
    }

    #[tokio::test]
    async fn test_block_replaced_between_calls_is_retryable() {
        let url = fake_node(vec![
            block_hash_json(7),
            json!({ "result": block_json(), "error": null, "id": 2 }),
            reward_json(0x77),
        ])
        .await;

        let err = client(url).block(7).await.unwrap_err();
        assert!(matches!(err, NodeError::Protocol(_)), "{:?}", err);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_send_rejections_are_classified() {
        let url = fake_node(vec![json!({
            "result": null,
            "error": { "code": -6, "message": "Insufficient funds" },
            "id": 1
        })])
        .await;
        let node = client(url);

        assert!(matches!(
            node.send_payout(&batch()).await,
            Err(NodeError::InsufficientFunds(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{}", addr)).tip().await.unwrap_err();
        assert!(matches!(err, NodeError::Unreachable(_)), "{:?}", err);
    }
}
