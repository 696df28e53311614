//! Reorg reconciliation: roll the ledger back to the fork point and replay
//! the new best chain.
//!
//! The fork search walks the recorded window from the newest identity down,
//! comparing each against the source. It never looks further back than the
//! window: if no recorded block is still on the best chain the ledger cannot
//! be reconciled incrementally and the pass fails with
//! [`SyncError::Desync`]. The one exception is a window that reaches back to
//! the birth height, where replaying everything is always correct.

use tracing::info;

use crate::cursor::ChainCursor;
use crate::error::SyncError;
use crate::ledger::LedgerTxn;
use crate::source::ChainSource;
use crate::sync::{ScanStats, SyncEngine};
use crate::types::BlockRef;

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgReport {
    pub previous_tip: BlockRef,
    pub new_tip: BlockRef,
    /// Highest height still agreeing with the source; `None` when the whole
    /// window was replaced down to its start.
    pub fork_point: Option<u32>,
    /// Number of recorded blocks that were rolled back.
    pub depth: u32,
    /// Coins whose deposit or spend confirmation was undone.
    pub unconfirmed: usize,
    pub replayed: ScanStats,
}

pub struct Reconciler<'a, S: ChainSource + ?Sized> {
    source: &'a S,
    birth_height: u32,
}

impl<'a, S: ChainSource + ?Sized> Reconciler<'a, S> {
    pub fn new(source: &'a S, birth_height: u32) -> Self {
        Self {
            source,
            birth_height,
        }
    }

    /// Find the highest recorded height whose identity the source agrees with.
    ///
    /// Recorded heights above `source_tip` cannot agree and are skipped.
    /// `Ok(None)` means nothing agrees but the window starts at or below the
    /// birth height, so replaying from the window start is safe.
    pub async fn locate_fork_point(
        &self,
        cursor: &ChainCursor,
        source_tip: u32,
    ) -> Result<Option<u32>, SyncError> {
        for recorded in cursor.iter_desc().filter(|b| b.height <= source_tip) {
            let remote = self.source.block_hash(recorded.height).await?;
            if remote == recorded.hash {
                return Ok(Some(recorded.height));
            }
        }

        match cursor.oldest() {
            Some(oldest) if oldest.height <= self.birth_height => Ok(oldest.height.checked_sub(1)),
            _ => Err(SyncError::Desync {
                tip: cursor.height().unwrap_or_default(),
                depth: cursor.max_depth(),
            }),
        }
    }

    /// Roll `txn` back to the fork point and replay up to `new_tip`.
    ///
    /// Everything happens inside the caller's transaction; nothing is visible
    /// to readers until it is committed.
    pub async fn reconcile(
        &self,
        txn: &mut LedgerTxn,
        engine: &SyncEngine<'_, S>,
        previous_tip: BlockRef,
        new_tip: BlockRef,
    ) -> Result<ReorgReport, SyncError> {
        let fork_point = self.locate_fork_point(txn.cursor(), new_tip.height).await?;

        let unconfirmed = txn.rollback_above(fork_point);
        match fork_point {
            Some(height) => txn.cursor_mut().rollback_to(height),
            None => txn.cursor_mut().clear(),
        }
        let replay_from = fork_point.map_or(0, |h| h + 1);
        let depth = (previous_tip.height + 1).saturating_sub(replay_from);
        info!(
            previous_tip = %previous_tip,
            fork_point = ?fork_point,
            depth,
            unconfirmed,
            "Tip was rolled back."
        );

        let replayed = engine.scan_range(txn, replay_from, new_tip.height).await?;
        engine.sync_mempool(txn).await?;
        txn.check_invariants()?;

        Ok(ReorgReport {
            previous_tip,
            new_tip,
            fork_point,
            depth,
            unconfirmed,
            replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::CoinLedger;
    use crate::mock::MockChain;
    use crate::store::MemoryLedgerStore;
    use crate::types::{OutPoint, WatchList};

    fn cursor_for(chain: &MockChain, from: u32, upto: u32, max_depth: usize) -> ChainCursor {
        let mut cursor = ChainCursor::new(max_depth);
        for h in from..=upto {
            cursor.record(h, chain.hash_at(h).unwrap());
        }
        cursor
    }

    #[tokio::test]
    async fn fork_point_after_tip_remine() {
        let chain = MockChain::new();
        chain.mine(10);
        let cursor = cursor_for(&chain, 0, 10, 20);
        chain.invalidate_remine(10);
        let fork = Reconciler::new(&chain, 0)
            .locate_fork_point(&cursor, 10)
            .await
            .unwrap();
        assert_eq!(fork, Some(9));
    }

    #[tokio::test]
    async fn fork_point_skips_heights_above_source_tip() {
        let chain = MockChain::new();
        chain.mine(10);
        let cursor = cursor_for(&chain, 0, 10, 20);
        let fork = Reconciler::new(&chain, 0)
            .locate_fork_point(&cursor, 7)
            .await
            .unwrap();
        assert_eq!(fork, Some(7));
    }

    #[tokio::test]
    async fn fork_beyond_window_is_desync() {
        let chain = MockChain::new();
        chain.mine(20);
        let cursor = cursor_for(&chain, 0, 20, 5);
        chain.reorg(12, 0);
        let err = Reconciler::new(&chain, 0)
            .locate_fork_point(&cursor, 21)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Desync { tip: 20, depth: 5 }));
    }

    #[tokio::test]
    async fn window_reaching_birth_replays_everything() {
        let chain = MockChain::new();
        chain.mine(10);
        let cursor = cursor_for(&chain, 8, 10, 5);
        chain.reorg(8, 0);
        let fork = Reconciler::new(&chain, 8)
            .locate_fork_point(&cursor, 11)
            .await
            .unwrap();
        assert_eq!(fork, Some(7));
    }

    #[tokio::test]
    async fn reconcile_moves_deposit_to_new_height() {
        let chain = MockChain::new();
        let watch = WatchList::new(["bcrt1qmine"]);
        chain.mine(5);
        let dep = chain.send_to("bcrt1qmine", 42_000);
        chain.mine(3);
        let op = OutPoint::new(dep.txid, 0);

        let ledger = CoinLedger::open(Arc::new(MemoryLedgerStore::new()), 20)
            .await
            .unwrap();
        let mut txn = ledger.begin();
        let engine = SyncEngine::new(&chain, &watch);
        engine.scan_range(&mut txn, 0, 8).await.unwrap();
        assert_eq!(txn.coin(&op).unwrap().block_height, Some(6));

        let previous_tip = txn.cursor().tip().unwrap().clone();
        let new_tip = chain.reorg(6, 4);
        let report = Reconciler::new(&chain, 0)
            .reconcile(&mut txn, &engine, previous_tip, new_tip.clone())
            .await
            .unwrap();

        assert_eq!(report.fork_point, Some(5));
        assert_eq!(report.depth, 3);
        assert_eq!(report.unconfirmed, 1);
        assert_eq!(txn.coin(&op).unwrap().block_height, Some(10));
        assert_eq!(txn.cursor().tip(), Some(&new_tip));
    }
}
