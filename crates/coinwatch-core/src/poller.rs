//! The poll loop: drives detection, reconciliation and scanning.
//!
//! Each pass:
//!   1. Query the source tip
//!   2. Classify it against the chain cursor
//!   3. Unchanged → mempool sync; extended → scan the next batch then the
//!      mempool; reorganized → roll back and replay
//!   4. Commit the pass to the ledger as one unit
//!
//! A failed pass never commits. Transient failures are retried on the next
//! tick; fatal ones stop the loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::detector::{ChainChange, ChangeDetector};
use crate::error::SyncError;
use crate::ledger::{CoinLedger, LedgerReader, LedgerSnapshot};
use crate::reorg::{Reconciler, ReorgReport};
use crate::source::ChainSource;
use crate::store::LedgerStore;
use crate::sync::SyncEngine;
use crate::types::WatchList;
use crate::watcher::{WatcherConfig, WatcherState};

/// Result of a single poll pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    /// Scanned `[from, to]`; `target` is the source tip at the start of the pass.
    Extended { from: u32, to: u32, target: u32 },
    Reorganized(ReorgReport),
}

impl PollOutcome {
    /// `false` while a batched catch-up scan still has blocks to go.
    pub fn is_caught_up(&self) -> bool {
        !matches!(self, Self::Extended { to, target, .. } if to < target)
    }
}

pub struct Poller<S: ChainSource> {
    config: WatcherConfig,
    source: S,
    ledger: CoinLedger,
    watch: WatchList,
    detector: ChangeDetector,
    state: WatcherState,
}

impl<S: ChainSource> Poller<S> {
    /// Open the ledger in `store` and prepare a poller over `source`.
    pub async fn open(
        config: WatcherConfig,
        source: S,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let ledger = CoinLedger::open(store, config.reorg_depth).await?;
        Ok(Self {
            watch: config.watch_list(),
            detector: ChangeDetector::new(config.birth_height),
            config,
            source,
            ledger,
            state: WatcherState::Idle,
        })
    }

    pub fn reader(&self) -> LedgerReader {
        self.ledger.reader()
    }

    pub fn ledger(&self) -> &CoinLedger {
        &self.ledger
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Track another address from the next scanned block on. Earlier blocks
    /// need a [`rescan`](Self::rescan) to pick up its history.
    pub fn watch_address(&mut self, address: impl Into<String>) -> bool {
        self.watch.insert(address)
    }

    /// The committed ledger merged with the source's current mempool.
    ///
    /// Nothing is committed, so the store and published snapshot are left
    /// alone. Used by processes that read the ledger next to a running
    /// watcher.
    pub async fn mempool_preview(&self) -> Result<LedgerSnapshot, SyncError> {
        let mut txn = self.ledger.begin();
        SyncEngine::new(&self.source, &self.watch)
            .sync_mempool(&mut txn)
            .await?;
        Ok(txn.snapshot())
    }

    /// Run one detect → reconcile/scan → commit pass.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, SyncError> {
        let tip = self.source.tip().await?;
        let mut txn = self.ledger.begin();
        let engine = SyncEngine::new(&self.source, &self.watch);

        let change = self
            .detector
            .classify(&self.source, txn.cursor(), &tip)
            .await?;
        let outcome = match change {
            ChainChange::Unchanged => {
                engine.sync_mempool(&mut txn).await?;
                PollOutcome::Unchanged
            }
            ChainChange::Extended { from, to } => {
                self.state = WatcherState::Syncing;
                let end = to.min(from.saturating_add(self.config.scan_batch_size - 1));
                let stats = engine.scan_range(&mut txn, from, end).await?;
                let mempool = engine.sync_mempool(&mut txn).await?;
                info!(
                    from,
                    to = end,
                    target = to,
                    deposits = stats.deposits,
                    spends = stats.spends,
                    mempool_txs = mempool.txs,
                    "Blocks scanned"
                );
                PollOutcome::Extended {
                    from,
                    to: end,
                    target: to,
                }
            }
            ChainChange::Reorganized {
                previous_tip,
                new_tip,
            } => {
                info!(
                    previous_tip = %previous_tip,
                    new_tip = %new_tip,
                    "Block chain reorganization detected."
                );
                self.state = WatcherState::ReorgRecovery;
                let report = Reconciler::new(&self.source, self.detector.birth_height())
                    .reconcile(&mut txn, &engine, previous_tip, new_tip)
                    .await?;
                info!(
                    fork_point = ?report.fork_point,
                    depth = report.depth,
                    replayed_blocks = report.replayed.blocks,
                    "Reorganization reconciled"
                );
                PollOutcome::Reorganized(report)
            }
        };

        self.ledger.commit(txn).await?;
        self.state = if outcome.is_caught_up() {
            WatcherState::Live
        } else {
            WatcherState::Syncing
        };
        Ok(outcome)
    }

    /// Poll until `shutdown` flips to `true`.
    ///
    /// Returns `Err` only for fatal errors, after which the ledger keeps its
    /// last committed state and an operator has to intervene.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            birth_height = self.config.birth_height,
            reorg_depth = self.config.reorg_depth,
            addresses = self.watch.len(),
            tip = ?self.ledger.cursor().height(),
            "Watcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            // Keep scanning without waiting for the next tick while catching up.
            loop {
                match self.poll_once().await {
                    Ok(outcome) if outcome.is_caught_up() => break,
                    Ok(outcome) => {
                        debug!(?outcome, "catching up");
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "poll pass failed, retrying on next tick");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "watcher halted");
                        self.state = WatcherState::Error;
                        return Err(e);
                    }
                }
            }
        }

        self.state = WatcherState::Stopped;
        info!("Watcher stopped");
        Ok(())
    }

    /// Schedule a rescan from `from`: undo every confirmation at or above it
    /// and anchor the cursor just below it. The next pass scans forward.
    pub async fn rescan(&mut self, from: u32) -> Result<(), SyncError> {
        let tip = self.source.block_count().await?;
        if from > tip {
            return Err(SyncError::Config(format!(
                "rescan height {from} is above the chain tip {tip}"
            )));
        }

        let mut txn = self.ledger.begin();
        let anchor = from.checked_sub(1);
        let unconfirmed = txn.rollback_above(anchor);
        txn.cursor_mut().clear();
        if let Some(height) = anchor {
            let hash = self.source.block_hash(height).await?;
            txn.cursor_mut().record(height, hash);
        }
        self.ledger.commit(txn).await?;
        self.state = WatcherState::Idle;
        info!(from, unconfirmed, "Rescan scheduled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;
    use crate::mock::MockChain;
    use crate::store::MemoryLedgerStore;

    /// Collects the message of every event, in emission order.
    #[derive(Clone, Default)]
    struct Messages(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for Messages {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct MessageField<'a>(&'a mut Option<String>);

            impl Visit for MessageField<'_> {
                fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "message" {
                        *self.0 = Some(format!("{value:?}"));
                    }
                }
            }

            let mut message = None;
            event.record(&mut MessageField(&mut message));
            if let Some(message) = message {
                self.0.lock().unwrap().push(message);
            }
        }
    }

    async fn poller(chain: Arc<MockChain>, batch: u32) -> Poller<Arc<MockChain>> {
        let config = WatcherConfig {
            scan_batch_size: batch,
            poll_interval_ms: 5,
            addresses: vec!["bcrt1qmine".into()],
            ..WatcherConfig::default()
        };
        Poller::open(config, chain, Arc::new(MemoryLedgerStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn catches_up_in_batches() {
        let chain = Arc::new(MockChain::new());
        chain.mine(25);
        let mut p = poller(chain.clone(), 10).await;

        let first = p.poll_once().await.unwrap();
        assert_eq!(first, PollOutcome::Extended { from: 0, to: 9, target: 25 });
        assert_eq!(p.state(), WatcherState::Syncing);
        p.poll_once().await.unwrap();
        let last = p.poll_once().await.unwrap();
        assert_eq!(last, PollOutcome::Extended { from: 20, to: 25, target: 25 });
        assert!(last.is_caught_up());
        assert_eq!(p.state(), WatcherState::Live);
        assert_eq!(p.poll_once().await.unwrap(), PollOutcome::Unchanged);
    }

    #[tokio::test]
    async fn reorg_pass_reports_fork() {
        let chain = Arc::new(MockChain::new());
        chain.mine(10);
        let mut p = poller(chain.clone(), 100).await;
        p.poll_once().await.unwrap();

        chain.invalidate_remine(9);
        match p.poll_once().await.unwrap() {
            PollOutcome::Reorganized(report) => {
                assert_eq!(report.fork_point, Some(8));
                assert_eq!(report.depth, 2);
            }
            other => panic!("expected reorg, got {other:?}"),
        }
        assert_eq!(p.reader().snapshot().tip, Some(chain.best_block()));
    }

    #[tokio::test]
    async fn reorg_logs_detection_then_rollback() {
        let messages = Messages::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(messages.clone()));

        let chain = Arc::new(MockChain::new());
        chain.mine(6);
        let mut p = poller(chain.clone(), 100).await;
        p.poll_once().await.unwrap();
        chain.invalidate_remine(5);
        assert!(matches!(p.poll_once().await.unwrap(), PollOutcome::Reorganized(_)));

        let logged = messages.0.lock().unwrap().clone();
        let position = |text: &str| logged.iter().position(|m| m == text);
        let detected = position("Block chain reorganization detected.").unwrap();
        let rolled_back = position("Tip was rolled back.").unwrap();
        assert!(detected < rolled_back);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let chain = Arc::new(MockChain::new());
        chain.mine(3);
        let mut p = poller(chain.clone(), 2).await;
        let reader = p.reader();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let result = p.run(rx).await;
            (result, p.state())
        });
        while reader.snapshot().height() != Some(3) {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        tx.send(true).unwrap();
        let (result, state) = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, WatcherState::Stopped);
    }

    #[tokio::test]
    async fn mempool_preview_is_not_committed() {
        let chain = Arc::new(MockChain::new());
        chain.mine(2);
        let mut p = poller(chain.clone(), 10).await;
        p.poll_once().await.unwrap();
        let committed = p.reader().snapshot();

        chain.send_to("bcrt1qmine", 5_000);
        let preview = p.mempool_preview().await.unwrap();
        assert_eq!(preview.coins.len(), 1);
        assert_eq!(preview.coins[0].block_height, None);
        assert_eq!(preview.tip, committed.tip);
        assert_eq!(p.reader().snapshot(), committed);
        assert!(p.ledger().is_empty());
    }

    #[tokio::test]
    async fn rescan_above_tip_is_rejected() {
        let chain = Arc::new(MockChain::new());
        chain.mine(3);
        let mut p = poller(chain, 10).await;
        assert!(matches!(p.rescan(4).await, Err(SyncError::Config(_))));
    }
}
