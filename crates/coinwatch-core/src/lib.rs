//! coinwatch-core: reorg-safe chain synchronization and coin state for a
//! watch-only wallet backend.
//!
//! # Architecture
//!
//! ```text
//! WatcherBuilder → Poller (poll loop)
//!                     ├── ChangeDetector  (unchanged / extended / reorganized)
//!                     ├── Reconciler      (fork point, rollback, replay)
//!                     ├── SyncEngine      (block + mempool scanning)
//!                     └── CoinLedger      (coins, ChainCursor, mempool layer)
//!                              └── LedgerStore (memory / SQLite)
//! ```
//!
//! Every pass works on a `LedgerTxn` that is committed atomically, so the
//! `getinfo` / `listcoins` read contracts never see a half-reconciled ledger.

pub mod builder;
pub mod coin;
pub mod cursor;
pub mod detector;
pub mod error;
pub mod ledger;
pub mod mempool;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod poller;
pub mod reorg;
pub mod retry;
pub mod rpc;
pub mod source;
pub mod store;
pub mod sync;
pub mod types;
pub mod watcher;

pub use builder::WatcherBuilder;
pub use coin::{Coin, CoinStatus, SpendInfo};
pub use cursor::ChainCursor;
pub use detector::{ChainChange, ChangeDetector};
pub use error::SyncError;
pub use ledger::{CoinLedger, LedgerReader, LedgerSnapshot, LedgerTxn};
pub use mempool::MempoolLayer;
pub use poller::{PollOutcome, Poller};
pub use reorg::{Reconciler, ReorgReport};
pub use retry::{RetryConfig, RetryPolicy};
pub use rpc::{GetInfoResult, ListCoinsResult};
pub use source::{ChainSource, RetryingSource};
pub use store::{LedgerChangeset, LedgerStore, MemoryLedgerStore, PersistedLedger};
pub use sync::{MempoolStats, ScanStats, SyncEngine};
pub use types::{Block, BlockRef, OutPoint, Transaction, TxOut, WatchList};
pub use watcher::{WatcherConfig, WatcherState};
