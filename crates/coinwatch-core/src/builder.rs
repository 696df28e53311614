//! Fluent builder API for watcher configuration.
//!
//! # Example
//!
//! ```rust
//! use coinwatch_core::WatcherBuilder;
//!
//! let config = WatcherBuilder::new()
//!     .birth_height(800_000)
//!     .reorg_depth(144)
//!     .poll_interval_ms(10_000)
//!     .address("bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh")
//!     .build_config()
//!     .unwrap();
//! assert_eq!(config.addresses.len(), 1);
//! ```

use crate::error::SyncError;
use crate::retry::RetryConfig;
use crate::watcher::WatcherConfig;

/// Fluent builder for `WatcherConfig`.
#[derive(Default)]
pub struct WatcherBuilder {
    config: WatcherConfig,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: WatcherConfig::default(),
        }
    }

    /// Start from an existing config (e.g. loaded from a file).
    pub fn from_config(config: WatcherConfig) -> Self {
        Self { config }
    }

    /// Set the first height that may contain watched coins.
    pub fn birth_height(mut self, height: u32) -> Self {
        self.config.birth_height = height;
        self
    }

    /// Set how many block identities are kept for fork detection.
    pub fn reorg_depth(mut self, depth: usize) -> Self {
        self.config.reorg_depth = depth;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the maximum number of blocks scanned per pass.
    pub fn scan_batch_size(mut self, size: u32) -> Self {
        self.config.scan_batch_size = size;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Watch one more address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.addresses.push(address.into());
        self
    }

    pub fn addresses<I, A>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.config.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Validate and build the `WatcherConfig`.
    pub fn build_config(self) -> Result<WatcherConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
