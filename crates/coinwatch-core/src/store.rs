//! Ledger persistence: the transactional layer the coin ledger commits to.
//!
//! A pass produces one [`LedgerChangeset`]; the store must apply it
//! atomically so a crash never leaves a half-applied rollback on disk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::coin::Coin;
use crate::error::SyncError;
use crate::types::{BlockRef, OutPoint};

/// Everything the ledger persists: coin records and the cursor window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedLedger {
    pub coins: Vec<Coin>,
    pub blocks: Vec<BlockRef>,
}

/// The writes produced by one poll pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChangeset {
    /// Coins to upsert, keyed by outpoint.
    pub coins: Vec<Coin>,
    /// Replacement for the whole recorded block window, if the cursor moved.
    pub blocks: Option<Vec<BlockRef>>,
}

impl LedgerChangeset {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty() && self.blocks.is_none()
    }
}

/// Trait for loading and atomically committing ledger state.
///
/// Implementations include `MemoryLedgerStore` and `SqliteLedgerStore`
/// (in `coinwatch-storage`).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load everything persisted so far.
    async fn load(&self) -> Result<PersistedLedger, SyncError>;

    /// Apply a changeset in a single storage transaction.
    async fn commit(&self, changeset: &LedgerChangeset) -> Result<(), SyncError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
struct MemoryData {
    coins: BTreeMap<OutPoint, Coin>,
    blocks: Vec<BlockRef>,
}

/// In-memory ledger store for tests and ephemeral watchers.
#[derive(Default)]
pub struct MemoryLedgerStore {
    data: Mutex<MemoryData>,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty changesets committed so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make every subsequent commit fail (simulates a broken disk).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<PersistedLedger, SyncError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(PersistedLedger {
            coins: data.coins.values().cloned().collect(),
            blocks: data.blocks.clone(),
        })
    }

    async fn commit(&self, changeset: &LedgerChangeset) -> Result<(), SyncError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("memory store: commit refused".into()));
        }
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        for coin in &changeset.coins {
            data.coins.insert(coin.outpoint.clone(), coin.clone());
        }
        if let Some(blocks) = &changeset.blocks {
            data.blocks = blocks.clone();
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
