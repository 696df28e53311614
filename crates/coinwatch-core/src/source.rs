//! The `ChainSource` trait: how the core talks to the authoritative chain.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::types::{Block, BlockRef, Transaction};

/// Read access to a (possibly reorganizing) block chain.
///
/// Errors from these calls are expected to be transient
/// ([`SyncError::Source`] / [`SyncError::Timeout`]).
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Height of the best block.
    async fn block_count(&self) -> Result<u32, SyncError>;

    /// Hash of the best-chain block at `height`.
    async fn block_hash(&self, height: u32) -> Result<String, SyncError>;

    /// Full block by hash.
    async fn block(&self, hash: &str) -> Result<Block, SyncError>;

    /// Txids currently in the mempool.
    async fn mempool_txids(&self) -> Result<Vec<String>, SyncError>;

    /// Look up a transaction; `None` if the source does not know it.
    async fn raw_transaction(&self, txid: &str) -> Result<Option<Transaction>, SyncError>;

    /// Best block height and identity.
    async fn tip(&self) -> Result<BlockRef, SyncError> {
        let height = self.block_count().await?;
        let hash = self.block_hash(height).await?;
        Ok(BlockRef::new(height, hash))
    }
}

#[async_trait]
impl<S: ChainSource + ?Sized> ChainSource for Arc<S> {
    async fn block_count(&self) -> Result<u32, SyncError> {
        (**self).block_count().await
    }

    async fn block_hash(&self, height: u32) -> Result<String, SyncError> {
        (**self).block_hash(height).await
    }

    async fn block(&self, hash: &str) -> Result<Block, SyncError> {
        (**self).block(hash).await
    }

    async fn mempool_txids(&self) -> Result<Vec<String>, SyncError> {
        (**self).mempool_txids().await
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Option<Transaction>, SyncError> {
        (**self).raw_transaction(txid).await
    }

    async fn tip(&self) -> Result<BlockRef, SyncError> {
        (**self).tip().await
    }
}

// ─── RetryingSource ───────────────────────────────────────────────────────────

/// Wraps a source with a per-call timeout and exponential backoff.
///
/// Only transient errors are retried. Once retries are exhausted the last
/// error is returned; it never turns into a reorg.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<S: ChainSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, method: &'static str, call: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match self.policy.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying chain source request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(method, attempt, error = %e, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: ChainSource> ChainSource for RetryingSource<S> {
    async fn block_count(&self) -> Result<u32, SyncError> {
        self.with_retry("getblockcount", || self.inner.block_count()).await
    }

    async fn block_hash(&self, height: u32) -> Result<String, SyncError> {
        self.with_retry("getblockhash", || self.inner.block_hash(height)).await
    }

    async fn block(&self, hash: &str) -> Result<Block, SyncError> {
        self.with_retry("getblock", || self.inner.block(hash)).await
    }

    async fn mempool_txids(&self) -> Result<Vec<String>, SyncError> {
        self.with_retry("getrawmempool", || self.inner.mempool_txids()).await
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Option<Transaction>, SyncError> {
        self.with_retry("getrawtransaction", || self.inner.raw_transaction(txid)).await
    }
}
