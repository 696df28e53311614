//! Watcher configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::retry::RetryConfig;
use crate::types::WatchList;

/// Configuration for a watcher instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// First block that can contain coins of the watched addresses.
    #[serde(default)]
    pub birth_height: u32,
    /// Number of block identities retained for fork detection. A reorg
    /// deeper than this halts the watcher until an operator rescan.
    #[serde(default = "default_reorg_depth")]
    pub reorg_depth: usize,
    /// Poll interval (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum blocks scanned per pass while catching up.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: u32,
    /// Timeout for a single chain-source request (milliseconds).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Addresses whose outputs are tracked.
    #[serde(default)]
    pub addresses: Vec<String>,
}

fn default_reorg_depth() -> usize { 288 }
fn default_poll_interval_ms() -> u64 { 30_000 }
fn default_scan_batch_size() -> u32 { 1_000 }
fn default_request_timeout_ms() -> u64 { 15_000 }

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            birth_height: 0,
            reorg_depth: default_reorg_depth(),
            poll_interval_ms: default_poll_interval_ms(),
            scan_batch_size: default_scan_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetryConfig::default(),
            addresses: Vec::new(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.reorg_depth == 0 {
            return Err(SyncError::Config("reorg_depth must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("poll_interval_ms must be non-zero".into()));
        }
        if self.scan_batch_size == 0 {
            return Err(SyncError::Config("scan_batch_size must be non-zero".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(SyncError::Config("request_timeout_ms must be non-zero".into()));
        }
        if let Some(empty) = self.addresses.iter().position(|a| a.trim().is_empty()) {
            return Err(SyncError::Config(format!("address #{empty} is empty")));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watch_list(&self) -> WatchList {
        WatchList::new(self.addresses.iter().cloned())
    }
}

/// Runtime state of the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherState {
    /// Not yet started.
    Idle,
    /// Scanning towards the source tip.
    Syncing,
    /// Caught up, following the tip.
    Live,
    /// Reconciling a reorganization.
    ReorgRecovery,
    /// Shut down on request.
    Stopped,
    /// Halted on a fatal error.
    Error,
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_yaml_like_json() {
        let cfg: WatcherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, WatcherConfig::default());
        assert_eq!(cfg.reorg_depth, 288);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_depth_and_blank_address() {
        let cfg = WatcherConfig {
            reorg_depth: 0,
            ..WatcherConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));

        let cfg = WatcherConfig {
            addresses: vec!["bcrt1qa".into(), " ".into()],
            ..WatcherConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn state_display() {
        assert_eq!(WatcherState::ReorgRecovery.to_string(), "reorg-recovery");
    }
}
