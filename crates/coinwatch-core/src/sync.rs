//! Rescan/sync engine: applies connected blocks and the mempool to a ledger
//! transaction.
//!
//! Block application is set-state: every deposit and spend is written as
//! "confirmed at height H", so scanning a range a second time produces no
//! changes.

use tracing::{debug, trace};

use crate::coin::Coin;
use crate::error::SyncError;
use crate::ledger::LedgerTxn;
use crate::mempool::MempoolLayer;
use crate::source::ChainSource;
use crate::types::{Block, WatchList};

/// Counters for one scanned range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub blocks: u32,
    /// Deposits created or (re)confirmed.
    pub deposits: usize,
    /// Spends recorded or moved to a new height.
    pub spends: usize,
}

/// Counters for one mempool sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MempoolStats {
    pub txs: usize,
    /// Transactions fetched from the source (not reused from the last sync).
    pub fetched: usize,
    pub deposits: usize,
    /// Pending spends cleared because their transaction left the mempool.
    pub cleared: usize,
}

pub struct SyncEngine<'a, S: ChainSource + ?Sized> {
    source: &'a S,
    watch: &'a WatchList,
}

impl<'a, S: ChainSource + ?Sized> SyncEngine<'a, S> {
    pub fn new(source: &'a S, watch: &'a WatchList) -> Self {
        Self { source, watch }
    }

    /// Scan `[start, end]` inclusive along the source's current best chain.
    ///
    /// Each block must link to the identity recorded for its parent; if it
    /// does not, the chain changed during the scan and the pass is abandoned
    /// with [`SyncError::ChainMoved`].
    pub async fn scan_range(
        &self,
        txn: &mut LedgerTxn,
        start: u32,
        end: u32,
    ) -> Result<ScanStats, SyncError> {
        let mut stats = ScanStats::default();
        for height in start..=end {
            let hash = self.source.block_hash(height).await?;
            let block = self.source.block(&hash).await?;
            if block.hash != hash || block.height != height {
                return Err(SyncError::ChainMoved { height });
            }
            let parent = height
                .checked_sub(1)
                .and_then(|h| txn.cursor().hash_at(h));
            if let Some(parent) = parent {
                if block.prev_hash != parent {
                    debug!(
                        height,
                        expected_parent = parent,
                        actual_parent = %block.prev_hash,
                        "block does not extend the recorded chain"
                    );
                    return Err(SyncError::ChainMoved { height });
                }
            }

            let applied = self.apply_block(txn, &block);
            stats.deposits += applied.deposits;
            stats.spends += applied.spends;
            stats.blocks += 1;
            txn.cursor_mut().record(height, block.hash);
        }
        Ok(stats)
    }

    fn apply_block(&self, txn: &mut LedgerTxn, block: &Block) -> ScanStats {
        let mut stats = ScanStats::default();
        for tx in &block.transactions {
            for input in &tx.inputs {
                if txn.confirm_spend(input, &tx.txid, block.height) {
                    stats.spends += 1;
                }
            }
            for (outpoint, out) in tx.created() {
                if let Some(address) = self.watch.matches(out) {
                    if txn.confirm_deposit(Coin::new(outpoint, address, out.amount), block.height) {
                        stats.deposits += 1;
                    }
                }
            }
        }
        if stats.deposits + stats.spends > 0 {
            trace!(
                height = block.height,
                deposits = stats.deposits,
                spends = stats.spends,
                "block applied"
            );
        }
        stats
    }

    /// Rebuild the mempool layer and clear pending spends that left it.
    pub async fn sync_mempool(&self, txn: &mut LedgerTxn) -> Result<MempoolStats, SyncError> {
        let txids = self.source.mempool_txids().await?;
        let mut stats = MempoolStats::default();
        let mut txs = Vec::with_capacity(txids.len());
        for txid in txids {
            if let Some(tx) = txn.mempool().cached(&txid) {
                txs.push(tx.clone());
                continue;
            }
            match self.source.raw_transaction(&txid).await? {
                Some(tx) => {
                    stats.fetched += 1;
                    txs.push(tx);
                }
                // Evicted or mined between the two calls.
                None => trace!(%txid, "mempool transaction no longer known"),
            }
        }

        let layer = MempoolLayer::build(txs, self.watch, |op| txn.is_persisted(op));
        stats.txs = layer.len();
        stats.deposits = layer.deposits().count();
        txn.set_mempool(layer);
        stats.cleared = txn.clear_stale_spends().len();
        if stats.cleared > 0 {
            debug!(cleared = stats.cleared, "pending spends left the mempool");
        }
        Ok(stats)
    }
}
