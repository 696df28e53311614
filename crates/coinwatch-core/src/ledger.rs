//! Coin ledger: the single source of truth for coin records.
//!
//! All mutation goes through a [`LedgerTxn`]: a poll pass takes a working copy
//! with [`CoinLedger::begin`], applies rollbacks and scans to it, and hands it
//! back to [`CoinLedger::commit`]. The commit writes the changeset to the
//! store in one transaction and only then publishes a new snapshot, so readers
//! never observe a partially reconciled ledger. Dropping the working copy
//! discards the pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error};

use crate::coin::{Coin, SpendInfo};
use crate::cursor::ChainCursor;
use crate::error::SyncError;
use crate::mempool::MempoolLayer;
use crate::store::{LedgerChangeset, LedgerStore};
use crate::types::{BlockRef, OutPoint};

// ─── Snapshots ────────────────────────────────────────────────────────────────

/// An immutable, committed view of the ledger with the mempool merged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub tip: Option<BlockRef>,
    /// Persisted coins plus mempool deposits, ordered by outpoint.
    pub coins: Vec<Coin>,
}

impl LedgerSnapshot {
    pub fn height(&self) -> Option<u32> {
        self.tip.as_ref().map(|b| b.height)
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins
            .binary_search_by(|c| c.outpoint.cmp(outpoint))
            .ok()
            .map(|i| &self.coins[i])
    }
}

/// Cheap, cloneable read handle onto the last committed snapshot.
#[derive(Clone)]
pub struct LedgerReader {
    published: Arc<RwLock<Arc<LedgerSnapshot>>>,
}

impl LedgerReader {
    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ─── CoinLedger ───────────────────────────────────────────────────────────────

pub struct CoinLedger {
    store: Arc<dyn LedgerStore>,
    coins: BTreeMap<OutPoint, Coin>,
    cursor: ChainCursor,
    mempool: MempoolLayer,
    published: Arc<RwLock<Arc<LedgerSnapshot>>>,
}

impl CoinLedger {
    /// Load the persisted ledger and cursor window from `store`.
    pub async fn open(store: Arc<dyn LedgerStore>, reorg_depth: usize) -> Result<Self, SyncError> {
        let persisted = store.load().await?;
        let cursor = ChainCursor::from_blocks(reorg_depth, persisted.blocks);
        let mut coins = BTreeMap::new();
        for coin in persisted.coins {
            coin.check()?;
            coins.insert(coin.outpoint.clone(), coin);
        }
        debug!(
            coins = coins.len(),
            tip = ?cursor.height(),
            "ledger loaded"
        );

        let mempool = MempoolLayer::new();
        let snapshot = LedgerSnapshot {
            tip: cursor.tip().cloned(),
            coins: mempool.overlay(&coins),
        };
        Ok(Self {
            store,
            coins,
            cursor,
            mempool,
            published: Arc::new(RwLock::new(Arc::new(snapshot))),
        })
    }

    pub fn reader(&self) -> LedgerReader {
        LedgerReader {
            published: self.published.clone(),
        }
    }

    pub fn cursor(&self) -> &ChainCursor {
        &self.cursor
    }

    /// A persisted coin (the mempool layer is not consulted).
    pub fn coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Start a pass on a private working copy.
    pub fn begin(&self) -> LedgerTxn {
        LedgerTxn {
            coins: self.coins.clone(),
            dirty: BTreeSet::new(),
            cursor: self.cursor.clone(),
            cursor_dirty: false,
            mempool: self.mempool.clone(),
        }
    }

    /// Validate, persist and publish a finished pass.
    ///
    /// On error nothing is published and the in-memory state is untouched.
    pub async fn commit(&mut self, txn: LedgerTxn) -> Result<(), SyncError> {
        if let Err(e) = txn.check_invariants() {
            error!(error = %e, "ledger invariant violated; discarding pass");
            return Err(e);
        }

        let changeset = txn.changeset();
        if !changeset.is_empty() {
            self.store.commit(&changeset).await?;
            debug!(
                coins = changeset.coins.len(),
                cursor = changeset.blocks.is_some(),
                "ledger changes committed"
            );
        }

        let snapshot = Arc::new(txn.snapshot());
        self.coins = txn.coins;
        self.cursor = txn.cursor;
        self.mempool = txn.mempool;
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        Ok(())
    }
}

// ─── LedgerTxn ────────────────────────────────────────────────────────────────

/// Working copy of the ledger for one pass. Mutations are set-state, so
/// applying the same block twice leaves the copy unchanged.
#[derive(Debug, Clone)]
pub struct LedgerTxn {
    coins: BTreeMap<OutPoint, Coin>,
    dirty: BTreeSet<OutPoint>,
    cursor: ChainCursor,
    cursor_dirty: bool,
    mempool: MempoolLayer,
}

impl LedgerTxn {
    pub fn cursor(&self) -> &ChainCursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut ChainCursor {
        self.cursor_dirty = true;
        &mut self.cursor
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    pub fn is_persisted(&self, outpoint: &OutPoint) -> bool {
        self.coins.contains_key(outpoint)
    }

    pub fn mempool(&self) -> &MempoolLayer {
        &self.mempool
    }

    pub fn set_mempool(&mut self, layer: MempoolLayer) {
        self.mempool = layer;
    }

    fn touch(&mut self, outpoint: &OutPoint) -> Option<&mut Coin> {
        let coin = self.coins.get_mut(outpoint)?;
        self.dirty.insert(outpoint.clone());
        Some(coin)
    }

    /// Record `coin`'s deposit as confirmed at `height`, creating the coin if
    /// it is new. Returns `true` if anything changed.
    pub fn confirm_deposit(&mut self, coin: Coin, height: u32) -> bool {
        match self.coins.get(&coin.outpoint) {
            Some(existing) if existing.block_height == Some(height) => false,
            Some(_) => {
                if let Some(existing) = self.touch(&coin.outpoint) {
                    existing.block_height = Some(height);
                }
                true
            }
            None => {
                let outpoint = coin.outpoint.clone();
                self.coins.insert(
                    outpoint.clone(),
                    Coin {
                        block_height: Some(height),
                        ..coin
                    },
                );
                self.dirty.insert(outpoint);
                true
            }
        }
    }

    /// Record a confirmed spend of a tracked coin. Returns `true` if anything
    /// changed; spends of unknown outpoints are ignored.
    pub fn confirm_spend(&mut self, outpoint: &OutPoint, txid: &str, height: u32) -> bool {
        let spend = SpendInfo {
            txid: txid.to_string(),
            height: Some(height),
        };
        match self.coins.get(outpoint) {
            None => false,
            Some(coin) if coin.spend_info.as_ref() == Some(&spend) => false,
            Some(_) => {
                if let Some(coin) = self.touch(outpoint) {
                    coin.spend_info = Some(spend);
                }
                true
            }
        }
    }

    /// Undo every confirmation above `fork`; `None` undoes all of them.
    ///
    /// Deposits lose their height, spends are demoted to pending. Returns the
    /// number of coins affected.
    pub fn rollback_above(&mut self, fork: Option<u32>) -> usize {
        let above = |h: Option<u32>| match (h, fork) {
            (Some(h), Some(fork)) => h > fork,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let affected: Vec<OutPoint> = self
            .coins
            .values()
            .filter(|c| {
                above(c.block_height) || above(c.spend_info.as_ref().and_then(|s| s.height))
            })
            .map(|c| c.outpoint.clone())
            .collect();

        for outpoint in &affected {
            if let Some(coin) = self.touch(outpoint) {
                if above(coin.block_height) {
                    coin.block_height = None;
                }
                if let Some(spend) = coin.spend_info.as_mut() {
                    if above(spend.height) {
                        spend.height = None;
                    }
                }
            }
        }
        affected.len()
    }

    /// Clear persisted pending spends whose transaction is no longer in the
    /// current mempool layer. Returns the coins that reverted.
    pub fn clear_stale_spends(&mut self) -> Vec<OutPoint> {
        let stale: Vec<OutPoint> = self
            .coins
            .values()
            .filter(|c| {
                matches!(&c.spend_info, Some(s) if s.height.is_none() && !self.mempool.contains_tx(&s.txid))
            })
            .map(|c| c.outpoint.clone())
            .collect();
        for outpoint in &stale {
            if let Some(coin) = self.touch(outpoint) {
                coin.spend_info = None;
            }
        }
        stale
    }

    pub fn check_invariants(&self) -> Result<(), SyncError> {
        self.coins.values().try_for_each(Coin::check)
    }

    /// The writes this pass needs persisted.
    pub fn changeset(&self) -> LedgerChangeset {
        LedgerChangeset {
            coins: self
                .dirty
                .iter()
                .filter_map(|op| self.coins.get(op).cloned())
                .collect(),
            blocks: self
                .cursor_dirty
                .then(|| self.cursor.blocks().cloned().collect()),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            tip: self.cursor.tip().cloned(),
            coins: self.mempool.overlay(&self.coins),
        }
    }
}
