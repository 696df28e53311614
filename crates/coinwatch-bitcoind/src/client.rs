//! bitcoind chain source over HTTP JSON-RPC, backed by `reqwest`.
//!
//! The client performs single attempts; wrap it in
//! [`coinwatch_core::RetryingSource`] for backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use coinwatch_core::{Block, ChainSource, SyncError, Transaction};

use crate::rpc::{BitcoindError, RpcBlock, RpcRequest, RpcResponse, RpcTx};

/// Connection settings for a bitcoind node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BitcoindConfig {
    /// e.g. `http://127.0.0.1:18443` for regtest.
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// HTTP-level timeout per request (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 { 30_000 }

impl BitcoindConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

pub struct BitcoindClient {
    url: String,
    http: reqwest::Client,
    auth: Option<(String, Option<String>)>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl BitcoindClient {
    pub fn new(config: BitcoindConfig) -> Result<Self, BitcoindError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BitcoindError::Setup(e.to_string()))?;

        Ok(Self {
            url: config.url,
            http,
            auth: config.user.map(|user| (user, config.password)),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and decode its `result`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, BitcoindError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest::new(id, method, params);

        let mut builder = self.http.post(&self.url).json(&req);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, password.as_ref());
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BitcoindError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }
            } else {
                BitcoindError::Http(e.to_string())
            }
        })?;

        // bitcoind reports RPC errors with a 4xx/5xx status and a JSON body.
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BitcoindError::Http(e.to_string()))?;
        let parsed = match serde_json::from_str::<RpcResponse>(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(BitcoindError::Http(format!("HTTP {}: {body}", status.as_u16())));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(err) = parsed.error {
            tracing::debug!(method, code = err.code, message = %err.message, "bitcoind RPC error");
            return Err(BitcoindError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(parsed.result)?)
    }

    /// Like [`call`](Self::call), mapping "not found" to `None`.
    async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<T>, BitcoindError> {
        match self.call(method, params).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChainSource for BitcoindClient {
    async fn block_count(&self) -> Result<u32, SyncError> {
        Ok(self.call("getblockcount", vec![]).await?)
    }

    async fn block_hash(&self, height: u32) -> Result<String, SyncError> {
        Ok(self.call("getblockhash", vec![json!(height)]).await?)
    }

    async fn block(&self, hash: &str) -> Result<Block, SyncError> {
        let block: RpcBlock = self.call("getblock", vec![json!(hash), json!(2)]).await?;
        Ok(block.into())
    }

    async fn mempool_txids(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.call("getrawmempool", vec![]).await?)
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Option<Transaction>, SyncError> {
        let tx: Option<RpcTx> = self
            .call_optional("getrawtransaction", vec![json!(txid), json!(true)])
            .await?;
        Ok(tx.map(Transaction::from))
    }
}
