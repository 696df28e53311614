//! CoinWatch CLI: runs the watcher daemon and inspects its ledger.
//!
//! # Commands
//! ```text
//! coinwatch run        [--address <addr>...]
//! coinwatch getinfo
//! coinwatch listcoins
//! coinwatch rescan     --from <height>
//! ```
//!
//! Every command reads `--config` (default `./coinwatch.yaml`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use coinwatch_bitcoind::BitcoindClient;
use coinwatch_core::{
    ChainSource, CoinLedger, LedgerStore, ListCoinsResult, Poller, RetryPolicy, RetryingSource,
    SyncError,
};
use coinwatch_storage::SqliteLedgerStore;

mod config;
mod logging;

use config::AppConfig;

type Source = RetryingSource<BitcoindClient>;

#[derive(Parser)]
#[command(
    name = "coinwatch",
    about = "Reorg-safe coin tracking for a watch-only bitcoin wallet",
    long_about = "
CoinWatch follows a bitcoind node, tracks the coins of the configured
addresses and keeps them consistent across chain reorganizations.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the configured log filter
",
    version
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "coinwatch.yaml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the chain until interrupted (Ctrl-C)
    Run {
        /// Watch this address in addition to the configured ones
        #[arg(long)]
        address: Vec<String>,
    },

    /// Print the synced block height as JSON
    #[command(name = "getinfo")]
    GetInfo,

    /// Print every known coin, including the node's mempool, as JSON
    #[command(name = "listcoins")]
    ListCoins,

    /// Rescan from a height on the next run (stop the daemon first)
    Rescan {
        /// First height to scan again
        #[arg(long)]
        from: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)?;
    if cli.verbose {
        config.log.level = "debug".into();
    }
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Run { address } => cmd_run(&config, address).await,
        Commands::GetInfo => {
            let ledger = open_ledger(&config).await?;
            print_json(&ledger.reader().get_info())
        }
        Commands::ListCoins => {
            let poller = open_poller(&config).await?;
            print_json(&list_coins(&poller).await?)
        }
        Commands::Rescan { from } => cmd_rescan(&config, from).await,
    }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn cmd_run(config: &AppConfig, extra_addresses: Vec<String>) -> Result<()> {
    let mut poller = open_poller(config).await?;
    for address in extra_addresses {
        poller.watch_address(address);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    match poller.run(shutdown_rx).await {
        Ok(()) => Ok(()),
        Err(e @ SyncError::Desync { .. }) => {
            let tip = poller.reader().get_info().blockheight;
            Err(anyhow::Error::new(e).context(format!(
                "the watcher cannot follow the chain from height {tip}; \
                 run `coinwatch rescan --from <height>` below the fork and restart"
            )))
        }
        Err(e) => Err(e).context("watcher halted"),
    }
}

/// The persisted ledger merged with the node's current mempool, the same
/// view a running watcher serves.
async fn list_coins<S: ChainSource>(poller: &Poller<S>) -> Result<ListCoinsResult> {
    let snapshot = poller
        .mempool_preview()
        .await
        .context("read the node's mempool")?;
    Ok(ListCoinsResult::from(&snapshot))
}

async fn cmd_rescan(config: &AppConfig, from: u32) -> Result<()> {
    let mut poller = open_poller(config).await?;
    poller
        .rescan(from)
        .await
        .with_context(|| format!("schedule rescan from height {from}"))?;
    println!("Rescan from height {from} scheduled; it runs on the next `coinwatch run`.");
    Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn open_store(config: &AppConfig) -> Result<Arc<dyn LedgerStore>> {
    let store = SqliteLedgerStore::open(&config.database)
        .await
        .with_context(|| format!("open database '{}'", config.database))?;
    Ok(Arc::new(store))
}

async fn open_ledger(config: &AppConfig) -> Result<CoinLedger> {
    let store = open_store(config).await?;
    CoinLedger::open(store, config.watcher.reorg_depth)
        .await
        .context("load ledger")
}

async fn open_poller(config: &AppConfig) -> Result<Poller<Source>> {
    let client = BitcoindClient::new(config.bitcoind.clone())
        .with_context(|| format!("connect to bitcoind at '{}'", config.bitcoind.url))?;
    let source = RetryingSource::new(
        client,
        RetryPolicy::new(config.watcher.retry.clone()),
        config.watcher.request_timeout(),
    );
    let store = open_store(config).await?;
    Poller::open(config.watcher.clone(), source, store)
        .await
        .context("load ledger")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
