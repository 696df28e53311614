//! In-memory chain source for tests and local experiments. Enabled by the
//! `test-utils` feature.
//!
//! `MockChain` mimics the regtest controls of a node: mining blocks from the
//! mempool, invalidating and re-mining blocks, and reorganizing onto a
//! competing branch. Every new block gets a fresh hash, so replacing a block
//! at the same height is always visible as a different identity.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::SyncError;
use crate::source::ChainSource;
use crate::types::{Block, BlockRef, OutPoint, Transaction, TxOut};

#[derive(Default)]
struct MockState {
    /// Best chain, indexed by height.
    blocks: Vec<Block>,
    /// Every block ever mined, including stale branches.
    by_hash: HashMap<String, Block>,
    mempool: Vec<Transaction>,
    nonce: u64,
    failures: u32,
    /// Countdown to a single failing call, see [`MockChain::fail_nth`].
    fail_in: Option<u32>,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.nonce += 1;
        format!("{prefix}{:062x}", self.nonce)
    }

    fn push_block(&mut self, transactions: Vec<Transaction>) -> BlockRef {
        let height = self.blocks.len() as u32;
        let prev_hash = self.blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        let hash = self.next_id("bb");
        let block = Block {
            height,
            hash,
            prev_hash,
            transactions,
        };
        let block_ref = block.block_ref();
        self.by_hash.insert(block.hash.clone(), block.clone());
        self.blocks.push(block);
        block_ref
    }

    fn disconnect_from(&mut self, height: u32) -> Vec<Transaction> {
        let start = (height as usize).min(self.blocks.len());
        self.blocks
            .drain(start..)
            .flat_map(|b| b.transactions)
            .collect()
    }

    fn tip(&self) -> BlockRef {
        self.blocks
            .last()
            .map(Block::block_ref)
            .unwrap_or_else(|| BlockRef::new(0, String::new()))
    }
}

/// A scriptable chain source.
pub struct MockChain {
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// A chain containing only the genesis block (height 0).
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.push_block(vec![]);
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current best height.
    pub fn height(&self) -> u32 {
        self.state().tip().height
    }

    /// Current best block.
    pub fn best_block(&self) -> BlockRef {
        self.state().tip()
    }

    /// Hash of the best-chain block at `height`.
    pub fn hash_at(&self, height: u32) -> Option<String> {
        self.state().blocks.get(height as usize).map(|b| b.hash.clone())
    }

    /// Make the next `n` chain-source calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state().failures = n;
    }

    /// Make only the `n`-th chain-source call from now (1-based) fail.
    pub fn fail_nth(&self, n: u32) {
        self.state().fail_in = Some(n.max(1));
    }

    /// Create and broadcast a transaction paying `amount` to `address`.
    /// The funding input comes from an untracked wallet.
    pub fn send_to(&self, address: &str, amount: u64) -> Transaction {
        let mut state = self.state();
        let funding = OutPoint::new(state.next_id("ff"), 0);
        let tx = Transaction {
            txid: state.next_id("aa"),
            inputs: vec![funding],
            outputs: vec![
                TxOut { address: Some(address.to_string()), amount },
                TxOut { address: Some("bcrt1qchange".into()), amount: 1_000 },
            ],
        };
        state.mempool.push(tx.clone());
        tx
    }

    /// Create and broadcast a transaction spending `outpoints` to `address`.
    pub fn spend(&self, outpoints: &[OutPoint], address: &str, amount: u64) -> Transaction {
        let mut state = self.state();
        let tx = Transaction {
            txid: state.next_id("cc"),
            inputs: outpoints.to_vec(),
            outputs: vec![TxOut { address: Some(address.to_string()), amount }],
        };
        state.mempool.push(tx.clone());
        tx
    }

    /// Put a known transaction (back) into the mempool.
    pub fn broadcast(&self, tx: Transaction) {
        let mut state = self.state();
        if !state.mempool.iter().any(|t| t.txid == tx.txid) {
            state.mempool.push(tx);
        }
    }

    /// Drop a transaction from the mempool without mining it.
    pub fn evict(&self, txid: &str) {
        self.state().mempool.retain(|t| t.txid != txid);
    }

    /// Mine `n` blocks; the first one includes the whole mempool.
    /// Returns the new tip.
    pub fn mine(&self, n: usize) -> BlockRef {
        let mut state = self.state();
        for i in 0..n {
            let txs = if i == 0 {
                std::mem::take(&mut state.mempool)
            } else {
                vec![]
            };
            state.push_block(txs);
        }
        state.tip()
    }

    /// Invalidate the block at `height` and mine as many blocks as were
    /// disconnected. Disconnected transactions go back to the mempool and
    /// confirm in the first replacement block.
    pub fn invalidate_remine(&self, height: u32) -> BlockRef {
        let mut state = self.state();
        let old_tip = state.tip().height;
        let txs = state.disconnect_from(height);
        state.mempool.splice(0..0, txs);
        for i in 0..=(old_tip - height) {
            let txs = if i == 0 {
                std::mem::take(&mut state.mempool)
            } else {
                vec![]
            };
            state.push_block(txs);
        }
        state.tip()
    }

    /// Replace the chain from `height` with a competing branch.
    ///
    /// - `shift >= 0`: disconnected transactions, followed by the current
    ///   mempool, confirm in the block at `height + shift`; the new tip is
    ///   `max(old_tip + 1, height + shift)`.
    /// - `shift < 0`: disconnected transactions are dropped (neither mined nor
    ///   in the mempool); the new tip is `old_tip + 1`.
    pub fn reorg(&self, height: u32, shift: i32) -> BlockRef {
        let mut state = self.state();
        let old_tip = state.tip().height;
        let mut txs = state.disconnect_from(height);
        let (confirm_at, new_tip) = if shift >= 0 {
            txs.append(&mut state.mempool);
            let at = height + shift as u32;
            (Some(at), (old_tip + 1).max(at))
        } else {
            (None, old_tip + 1)
        };
        let mut pending = Some(txs);
        for h in height..=new_tip {
            let block_txs = if Some(h) == confirm_at {
                pending.take().unwrap_or_default()
            } else {
                vec![]
            };
            state.push_block(block_txs);
        }
        state.tip()
    }

    fn check_failure(&self, state: &mut MockState) -> Result<(), SyncError> {
        if state.failures > 0 {
            state.failures -= 1;
            return Err(SyncError::Source("mock chain unavailable".into()));
        }
        match state.fail_in {
            Some(1) => {
                state.fail_in = None;
                Err(SyncError::Source("mock chain unavailable".into()))
            }
            Some(n) => {
                state.fail_in = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_count(&self) -> Result<u32, SyncError> {
        let mut state = self.state();
        self.check_failure(&mut state)?;
        Ok(state.tip().height)
    }

    async fn block_hash(&self, height: u32) -> Result<String, SyncError> {
        let mut state = self.state();
        self.check_failure(&mut state)?;
        state
            .blocks
            .get(height as usize)
            .map(|b| b.hash.clone())
            .ok_or_else(|| SyncError::Source(format!("block height {height} out of range")))
    }

    async fn block(&self, hash: &str) -> Result<Block, SyncError> {
        let mut state = self.state();
        self.check_failure(&mut state)?;
        state
            .by_hash
            .get(hash)
            .cloned()
            .ok_or_else(|| SyncError::Source(format!("block {hash} not found")))
    }

    async fn mempool_txids(&self) -> Result<Vec<String>, SyncError> {
        let mut state = self.state();
        self.check_failure(&mut state)?;
        Ok(state.mempool.iter().map(|t| t.txid.clone()).collect())
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Option<Transaction>, SyncError> {
        let mut state = self.state();
        self.check_failure(&mut state)?;
        let in_mempool = state.mempool.iter().find(|t| t.txid == txid);
        let in_chain = || {
            state
                .blocks
                .iter()
                .flat_map(|b| b.transactions.iter())
                .find(|t| t.txid == txid)
        };
        Ok(in_mempool.or_else(in_chain).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mine_confirms_mempool_in_first_block() {
        let chain = MockChain::new();
        let tx = chain.send_to("bcrt1qa", 10);
        let tip = chain.mine(2);
        assert_eq!(tip.height, 2);
        let state = chain.state();
        assert_eq!(state.blocks[1].transactions, vec![tx]);
        assert!(state.blocks[2].transactions.is_empty());
        assert!(state.mempool.is_empty());
    }

    #[test]
    fn invalidate_remine_keeps_height_changes_hash() {
        let chain = MockChain::new();
        chain.mine(10);
        let old = chain.hash_at(8).unwrap();
        let old_tip = chain.best_block();
        let new_tip = chain.invalidate_remine(8);
        assert_eq!(new_tip.height, old_tip.height);
        assert_ne!(new_tip.hash, old_tip.hash);
        assert_ne!(chain.hash_at(8).unwrap(), old);
        let hash8 = chain.hash_at(8).unwrap();
        assert_eq!(chain.state().blocks[9].prev_hash, hash8);
    }

    #[test]
    fn reorg_shift_semantics() {
        let chain = MockChain::new();
        chain.mine(20);
        assert_eq!(chain.reorg(10, 20).height, 30);

        let chain = MockChain::new();
        chain.mine(20);
        chain.send_to("bcrt1qa", 5);
        chain.mine(1);
        let tip = chain.reorg(21, -1);
        assert_eq!(tip.height, 22);
        let state = chain.state();
        assert!(state.mempool.is_empty());
        assert!(state.blocks.iter().all(|b| b.transactions.is_empty()));
    }

    #[test]
    fn reorg_with_shift_mines_the_mempool() {
        let chain = MockChain::new();
        chain.mine(5);
        let deposit = chain.send_to("bcrt1qa", 5);
        chain.mine(1);
        let pending = chain.spend(&[OutPoint::new(deposit.txid.clone(), 0)], "bcrt1qb", 4);
        chain.reorg(6, 0);
        let state = chain.state();
        assert!(state.mempool.is_empty());
        assert_eq!(state.blocks[6].transactions, vec![deposit, pending]);
    }

    #[tokio::test]
    async fn failures_are_transient_and_counted() {
        let chain = MockChain::new();
        chain.fail_next(1);
        assert!(chain.block_count().await.unwrap_err().is_transient());
        assert_eq!(chain.block_count().await.unwrap(), 0);

        chain.fail_nth(2);
        assert!(chain.block_count().await.is_ok());
        assert!(chain.block_count().await.is_err());
        assert!(chain.block_count().await.is_ok());
    }
}
