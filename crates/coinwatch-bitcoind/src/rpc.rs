//! bitcoind JSON-RPC wire types and the verbose block/transaction shapes the
//! client decodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use coinwatch_core::{Block, OutPoint, SyncError, Transaction, TxOut};

/// `RPC_INVALID_ADDRESS_OR_KEY`: unknown transaction or block.
pub const RPC_NOT_FOUND: i64 = -5;

// ─── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Vec<Value>,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "1.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BitcoindError {
    /// Connection refused, reset, bad status without an RPC body, ...
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Client setup error: {0}")]
    Setup(String),
}

impl BitcoindError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == RPC_NOT_FOUND)
    }
}

impl From<BitcoindError> for SyncError {
    fn from(e: BitcoindError) -> Self {
        match e {
            BitcoindError::Timeout { ms } => SyncError::Timeout { ms },
            BitcoindError::Setup(msg) => SyncError::Config(msg),
            other => SyncError::Source(other.to_string()),
        }
    }
}

// ─── Verbose block / transaction ──────────────────────────────────────────────

/// `getblock <hash> 2`
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub height: u32,
    /// Absent for the genesis block.
    #[serde(default, rename = "previousblockhash")]
    pub previous_block_hash: Option<String>,
    #[serde(default)]
    pub tx: Vec<RpcTx>,
}

/// `getrawtransaction <txid> true`, also embedded in verbose blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcTx {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RpcVin>,
    #[serde(default)]
    pub vout: Vec<RpcVout>,
}

/// Coinbase inputs carry neither `txid` nor `vout`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcVin {
    pub txid: Option<String>,
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcVout {
    /// BTC, not satoshis.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScript,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcScript {
    /// bitcoind ≥ 22.
    pub address: Option<String>,
    /// Older nodes.
    #[serde(default)]
    pub addresses: Vec<String>,
}

pub fn btc_to_sats(value: f64) -> u64 {
    (value * 100_000_000.0).round() as u64
}

impl From<RpcTx> for Transaction {
    fn from(tx: RpcTx) -> Self {
        let inputs = tx
            .vin
            .into_iter()
            .filter_map(|vin| Some(OutPoint::new(vin.txid?, vin.vout?)))
            .collect();
        let mut vout = tx.vout;
        vout.sort_by_key(|o| o.n);
        let outputs = vout
            .into_iter()
            .map(|o| {
                let RpcScript { address, addresses } = o.script_pub_key;
                let address = address.or_else(|| match addresses.as_slice() {
                    [single] => Some(single.clone()),
                    _ => None,
                });
                TxOut {
                    address,
                    amount: btc_to_sats(o.value),
                }
            })
            .collect();
        Transaction {
            txid: tx.txid,
            inputs,
            outputs,
        }
    }
}

impl From<RpcBlock> for Block {
    fn from(block: RpcBlock) -> Self {
        Block {
            height: block.height,
            hash: block.hash,
            prev_hash: block.previous_block_hash.unwrap_or_default(),
            transactions: block.tx.into_iter().map(Transaction::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_is_jsonrpc_1() {
        let req = RpcRequest::new(7, "getblockhash", vec![json!(100)]);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"jsonrpc": "1.0", "id": 7, "method": "getblockhash", "params": [100]}));
    }

    #[test]
    fn verbose_block_converts() {
        let raw = json!({
            "hash": "00aa",
            "height": 102,
            "previousblockhash": "0099",
            "tx": [
                {
                    "txid": "cb",
                    "vin": [{"coinbase": "03abcdef", "sequence": 4294967295u64}],
                    "vout": [{"value": 50.0, "n": 0, "scriptPubKey": {"address": "bcrt1qminer"}}]
                },
                {
                    "txid": "t1",
                    "vin": [{"txid": "prev", "vout": 3}],
                    "vout": [
                        {"value": 0.00001, "n": 1, "scriptPubKey": {"addresses": ["legacy"]}},
                        {"value": 0.1, "n": 0, "scriptPubKey": {"address": "bcrt1qa"}},
                        {"value": 0.0, "n": 2, "scriptPubKey": {"type": "nulldata"}}
                    ]
                }
            ]
        });
        let block: Block = serde_json::from_value::<RpcBlock>(raw).unwrap().into();
        assert_eq!(block.prev_hash, "0099");
        assert!(block.transactions[0].inputs.is_empty());
        let tx = &block.transactions[1];
        assert_eq!(tx.inputs, vec![OutPoint::new("prev", 3)]);
        assert_eq!(tx.outputs[0], TxOut { address: Some("bcrt1qa".into()), amount: 10_000_000 });
        assert_eq!(tx.outputs[1], TxOut { address: Some("legacy".into()), amount: 1_000 });
        assert_eq!(tx.outputs[2].address, None);
    }

    #[test]
    fn genesis_has_empty_parent() {
        let raw = json!({"hash": "0f9188", "height": 0, "tx": []});
        let block: Block = serde_json::from_value::<RpcBlock>(raw).unwrap().into();
        assert_eq!(block.prev_hash, "");
    }

    #[test]
    fn sats_rounding() {
        assert_eq!(btc_to_sats(0.29999999), 29_999_999);
        assert_eq!(btc_to_sats(21.0), 2_100_000_000);
    }

    #[test]
    fn error_mapping() {
        let not_found = BitcoindError::Rpc { code: -5, message: "No such mempool transaction".into() };
        assert!(not_found.is_not_found());
        assert!(SyncError::from(not_found).is_transient());
        assert!(matches!(
            SyncError::from(BitcoindError::Timeout { ms: 10 }),
            SyncError::Timeout { ms: 10 }
        ));
        assert!(SyncError::from(BitcoindError::Setup("bad".into())).is_fatal());
    }
}
