//! [`Ledger`] over Ethereum JSON-RPC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use ballot_types::{Ballot, BlockHash, Inclusion, TxHash};

use crate::abi::{decode_quantity, encode_cast_vote, encode_quantity, hex_data, parse_selector};
use crate::{Ledger, LedgerError, TxStatus};

/// `castVote(bytes32,bytes32,bytes32)`
pub const DEFAULT_VOTE_SELECTOR: &str = "0x40b08881";

/// Execution-reverted error code used by geth-compatible nodes.
const EXECUTION_REVERTED: i64 = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonRpcLedgerConfig {
    /// JSON-RPC endpoint of the node.
    pub endpoint: String,
    /// Address of the deployed voting contract.
    pub contract_address: String,
    /// Unlocked account the node signs ballot transactions with.
    pub sender_address: String,
    /// Function selector of the contract's vote entry point.
    pub vote_selector: String,
    /// Explicit gas limit; the node estimates when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    pub request_timeout_ms: u64,
}

impl Default for JsonRpcLedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".to_string(),
            contract_address: String::new(),
            sender_address: String::new(),
            vote_selector: DEFAULT_VOTE_SELECTOR.to_string(),
            gas_limit: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl JsonRpcLedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    block_number: String,
    block_hash: String,
    gas_used: Option<String>,
    /// Absent on pre-Byzantium chains, where success cannot be told apart.
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionObject {
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    hash: Option<String>,
}

pub struct JsonRpcLedger {
    client: reqwest::Client,
    config: JsonRpcLedgerConfig,
    selector: [u8; 4],
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(config: JsonRpcLedgerConfig) -> Result<Self, LedgerError> {
        let selector = parse_selector(&config.vote_selector)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            selector,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &JsonRpcLedgerConfig {
        &self.config
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!(method, id, "ledger rpc call");

        let response: RpcResponse = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(response.result)
            .map_err(|e| LedgerError::Malformed(format!("{method}: {e}")))
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, LedgerError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await
    }
}

fn parse_inclusion(receipt: &Receipt) -> Result<Inclusion, LedgerError> {
    let block_hash = BlockHash::from_hex(&receipt.block_hash)
        .map_err(|e| LedgerError::Malformed(e.to_string()))?;
    let gas_used = receipt.gas_used.as_deref().map(decode_quantity).transpose()?;
    Ok(Inclusion {
        block_number: decode_quantity(&receipt.block_number)?,
        block_hash,
        gas_used,
    })
}

fn receipt_status(receipt: &Receipt) -> Result<TxStatus, LedgerError> {
    let inclusion = parse_inclusion(receipt)?;
    match receipt.status.as_deref() {
        Some("0x1") | None => Ok(TxStatus::Mined(inclusion)),
        Some("0x0") => Ok(TxStatus::Reverted(inclusion)),
        Some(other) => Err(LedgerError::Malformed(format!(
            "receipt status {other}"
        ))),
    }
}

fn is_revert(code: i64, message: &str) -> bool {
    code == EXECUTION_REVERTED || message.to_ascii_lowercase().contains("revert")
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn submit_ballot(&self, ballot: &Ballot) -> Result<TxHash, LedgerError> {
        let mut tx = json!({
            "from": self.config.sender_address,
            "to": self.config.contract_address,
            "data": hex_data(&encode_cast_vote(self.selector, ballot)),
        });
        if let Some(gas) = self.config.gas_limit {
            tx["gas"] = Value::String(encode_quantity(gas));
        }

        let hash: String = match self.call("eth_sendTransaction", json!([tx])).await {
            Ok(hash) => hash,
            Err(LedgerError::Rpc { code, message }) if is_revert(code, &message) => {
                warn!(voter = %ballot.voter, election = %ballot.election, %message, "ballot transaction rejected");
                return Err(LedgerError::Rejected(message));
            }
            Err(e) => return Err(e),
        };
        TxHash::from_hex(&hash).map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    async fn transaction_status(&self, tx_hash: &TxHash) -> Result<TxStatus, LedgerError> {
        if let Some(receipt) = self.receipt(tx_hash).await? {
            return receipt_status(&receipt);
        }
        let tx: Option<TransactionObject> = self
            .call("eth_getTransactionByHash", json!([tx_hash.to_string()]))
            .await?;
        Ok(match tx {
            Some(tx) => {
                if tx.block_number.is_some() {
                    debug!(%tx_hash, "transaction included but receipt not yet served");
                }
                TxStatus::Pending
            }
            None => TxStatus::Unknown,
        })
    }

    async fn head_block(&self) -> Result<u64, LedgerError> {
        let head: String = self.call("eth_blockNumber", json!([])).await?;
        decode_quantity(&head)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>, LedgerError> {
        let block: Option<BlockHeader> = self
            .call(
                "eth_getBlockByNumber",
                json!([encode_quantity(number), false]),
            )
            .await?;
        match block.and_then(|b| b.hash) {
            Some(hash) => BlockHash::from_hex(&hash)
                .map(Some)
                .map_err(|e| LedgerError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }
}
