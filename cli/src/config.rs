//! `coinwatch.yaml`: daemon configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use coinwatch_bitcoind::BitcoindConfig;
use coinwatch_core::WatcherConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite database file holding the ledger.
    #[serde(default = "default_database")]
    pub database: String,
    pub bitcoind: BitcoindConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_database() -> String {
    "coinwatch.db".into()
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("invalid configuration")?;
        config
            .watcher
            .validate()
            .context("invalid watcher section")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("load '{}'", path.display()))
    }
}
