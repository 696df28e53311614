//! SQLite ledger store.
//!
//! Persists coins and the chain cursor window to a single SQLite file, using
//! `sqlx` with WAL mode. Every [`LedgerChangeset`] is applied inside one
//! SQLite transaction, so a crash mid-commit leaves the previous pass intact.
//!
//! # Usage
//! ```rust,no_run
//! use coinwatch_storage::sqlite::SqliteLedgerStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteLedgerStore::open("./coinwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteLedgerStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use coinwatch_core::store::{LedgerChangeset, LedgerStore, PersistedLedger};
use coinwatch_core::{BlockRef, Coin, OutPoint, SpendInfo, SyncError};

fn storage_err(e: sqlx::Error) -> SyncError {
    SyncError::Storage(e.to_string())
}

/// SQLite-backed store for coins and recorded block identities.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./coinwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./coinwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection is used so every query sees the same database.
    /// All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS coins (
                outpoint     TEXT    PRIMARY KEY,
                txid         TEXT    NOT NULL,
                vout         INTEGER NOT NULL,
                address      TEXT    NOT NULL,
                amount       INTEGER NOT NULL,
                block_height INTEGER,
                spend_txid   TEXT,
                spend_height INTEGER,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Chain cursor window
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                hash   TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_coins_address ON coins (address);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// Number of persisted coins.
    pub async fn coin_count(&self) -> Result<u64, SyncError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM coins")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }
}

// ─── LedgerStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn load(&self) -> Result<PersistedLedger, SyncError> {
        // Both reads see the same committed state.
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let rows = sqlx::query(
            "SELECT txid, vout, address, amount, block_height, spend_txid, spend_height
             FROM coins ORDER BY txid, vout",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_err)?;

        let coins = rows
            .into_iter()
            .map(|r| {
                let spend_txid: Option<String> = r.get("spend_txid");
                Coin {
                    outpoint: OutPoint::new(r.get::<String, _>("txid"), r.get::<i64, _>("vout") as u32),
                    address: r.get("address"),
                    amount: r.get::<i64, _>("amount") as u64,
                    block_height: r.get::<Option<i64>, _>("block_height").map(|h| h as u32),
                    spend_info: spend_txid.map(|txid| SpendInfo {
                        txid,
                        height: r.get::<Option<i64>, _>("spend_height").map(|h| h as u32),
                    }),
                }
            })
            .collect();

        let blocks = sqlx::query("SELECT height, hash FROM blocks ORDER BY height")
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_err)?
            .into_iter()
            .map(|r| BlockRef::new(r.get::<i64, _>("height") as u32, r.get::<String, _>("hash")))
            .collect();

        tx.commit().await.map_err(storage_err)?;
        Ok(PersistedLedger { coins, blocks })
    }

    async fn commit(&self, changeset: &LedgerChangeset) -> Result<(), SyncError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for coin in &changeset.coins {
            let spend = coin.spend_info.as_ref();
            sqlx::query(
                "INSERT OR REPLACE INTO coins
                 (outpoint, txid, vout, address, amount, block_height, spend_txid, spend_height, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(coin.outpoint.to_string())
            .bind(&coin.outpoint.txid)
            .bind(coin.outpoint.vout as i64)
            .bind(&coin.address)
            .bind(coin.amount as i64)
            .bind(coin.block_height.map(i64::from))
            .bind(spend.map(|s| s.txid.clone()))
            .bind(spend.and_then(|s| s.height).map(i64::from))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        if let Some(blocks) = &changeset.blocks {
            sqlx::query("DELETE FROM blocks")
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            for block in blocks {
                sqlx::query("INSERT INTO blocks (height, hash) VALUES (?, ?)")
                    .bind(block.height as i64)
                    .bind(&block.hash)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
            }
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(
            coins = changeset.coins.len(),
            blocks = changeset.blocks.as_ref().map(Vec::len),
            "ledger changeset persisted"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coinwatch_core::mock::MockChain;
    use coinwatch_core::{Poller, WatcherBuilder};

    use super::*;

    fn coin(txid: &str, vout: u32, height: Option<u32>) -> Coin {
        let mut c = Coin::new(OutPoint::new(txid, vout), "bcrt1qa", 12_345);
        c.block_height = height;
        c
    }

    #[tokio::test]
    async fn empty_database_loads_nothing() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        assert_eq!(store.load().await.unwrap(), PersistedLedger::default());
    }

    #[tokio::test]
    async fn commit_roundtrip_with_nullable_fields() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let mut spent = coin("bb", 1, Some(10));
        spent.spend_info = Some(SpendInfo { txid: "cc".into(), height: Some(11) });
        let mut pending = coin("aa", 0, Some(9));
        pending.spend_info = Some(SpendInfo { txid: "dd".into(), height: None });
        let unconfirmed = coin("aa", 1, None);

        store
            .commit(&LedgerChangeset {
                coins: vec![spent.clone(), pending.clone(), unconfirmed.clone()],
                blocks: Some(vec![BlockRef::new(10, "h10"), BlockRef::new(11, "h11")]),
            })
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.coins, vec![pending, unconfirmed, spent]);
        assert_eq!(loaded.blocks, vec![BlockRef::new(10, "h10"), BlockRef::new(11, "h11")]);
    }

    #[tokio::test]
    async fn upsert_overwrites_and_window_is_replaced() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        store
            .commit(&LedgerChangeset {
                coins: vec![coin("aa", 0, Some(5))],
                blocks: Some(vec![BlockRef::new(4, "a"), BlockRef::new(5, "b")]),
            })
            .await
            .unwrap();
        store
            .commit(&LedgerChangeset {
                coins: vec![coin("aa", 0, None)],
                blocks: Some(vec![BlockRef::new(4, "a")]),
            })
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.coins, vec![coin("aa", 0, None)]);
        assert_eq!(loaded.blocks, vec![BlockRef::new(4, "a")]);
        assert_eq!(store.coin_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn changeset_without_blocks_keeps_window() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        store
            .commit(&LedgerChangeset {
                coins: vec![],
                blocks: Some(vec![BlockRef::new(1, "x")]),
            })
            .await
            .unwrap();
        store
            .commit(&LedgerChangeset {
                coins: vec![coin("ee", 0, Some(1))],
                blocks: None,
            })
            .await
            .unwrap();
        assert_eq!(store.load().await.unwrap().blocks, vec![BlockRef::new(1, "x")]);
    }

    fn temp_db_path(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!(
                "coinwatch-{tag}-{}-{}.db",
                std::process::id(),
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ))
            .to_string_lossy()
            .into_owned()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn load_never_mixes_two_commits() {
        let path = temp_db_path("load");
        let writer = Arc::new(SqliteLedgerStore::open(&path).await.unwrap());
        let reader = SqliteLedgerStore::open(&path).await.unwrap();

        // Every commit moves the coin and the window tip to the same height.
        let handle = tokio::spawn({
            let writer = writer.clone();
            async move {
                for height in 1..=300u32 {
                    writer
                        .commit(&LedgerChangeset {
                            coins: vec![coin("aa", 0, Some(height))],
                            blocks: Some(vec![BlockRef::new(height, format!("h{height}"))]),
                        })
                        .await
                        .unwrap();
                }
            }
        });

        while !handle.is_finished() {
            let loaded = reader.load().await.unwrap();
            assert_eq!(
                loaded.coins.first().and_then(|c| c.block_height),
                loaded.blocks.last().map(|b| b.height),
            );
        }
        handle.await.unwrap();

        let loaded = reader.load().await.unwrap();
        assert_eq!(loaded.blocks, vec![BlockRef::new(300, "h300")]);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }

    #[tokio::test]
    async fn poller_state_survives_reopen() {
        let path = temp_db_path("reopen");

        let chain = Arc::new(MockChain::new());
        chain.mine(3);
        let tx = chain.send_to("bcrt1qwatched", 40_000);
        chain.mine(2);
        let config = WatcherBuilder::new()
            .address("bcrt1qwatched")
            .build_config()
            .unwrap();

        let store = Arc::new(SqliteLedgerStore::open(&path).await.unwrap());
        let mut poller = Poller::open(config.clone(), chain.clone(), store).await.unwrap();
        poller.poll_once().await.unwrap();
        let before = poller.reader().list_coins();
        drop(poller);

        let store = Arc::new(SqliteLedgerStore::open(&path).await.unwrap());
        let reopened = Poller::open(config, chain, store).await.unwrap();
        assert_eq!(reopened.reader().get_info().blockheight, 5);
        assert_eq!(reopened.reader().list_coins(), before);
        assert_eq!(
            before.coins[0].outpoint,
            OutPoint::new(tx.txid, 0)
        );

        let _ = std::fs::remove_file(&path);
    }
}
