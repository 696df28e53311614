//! coinwatch-bitcoind: a [`ChainSource`](coinwatch_core::ChainSource) backed
//! by a bitcoind node's JSON-RPC interface.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use coinwatch_bitcoind::{BitcoindClient, BitcoindConfig};
//! use coinwatch_core::{RetryPolicy, RetryingSource, WatcherConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BitcoindClient::new(
//!     BitcoindConfig::new("http://127.0.0.1:18443").with_auth("rpcuser", "rpcpass"),
//! )?;
//! let config = WatcherConfig::default();
//! let source = RetryingSource::new(
//!     client,
//!     RetryPolicy::new(config.retry.clone()),
//!     config.request_timeout(),
//! );
//! # let _ = source;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod rpc;

pub use client::{BitcoindClient, BitcoindConfig};
pub use rpc::BitcoindError;
