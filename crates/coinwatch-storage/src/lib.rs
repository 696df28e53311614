//! coinwatch-storage: persistent `LedgerStore` backends for CoinWatch.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! The in-memory store used by tests lives in `coinwatch_core::store`.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerStore;
