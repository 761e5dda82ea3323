//! Contract watcher binary
//!
//! Follows the chain head, decoding calls and events of the watched
//! contracts once they have enough confirmations.

use abiscan::config::{collect_addresses, load_abi};
use abiscan::rpc::EndpointRotation;
use abiscan::scanner::ScannerConfig;
use abiscan::sink::JsonlSink;
use abiscan::state::{MemoryState, ScanState};
use abiscan::store::{RocksBlockIndex, RocksScanState};
use abiscan::watcher::{HybridConnector, RpcConnector, SourceConnector, WatchConfig, WatchLoop};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Contract watcher
#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Decode calls and events of watched contracts as blocks are confirmed")]
struct Args {
    /// RPC endpoint URL, repeat for failover (tried in order)
    #[arg(short, long = "rpc-url", default_value = "http://127.0.0.1:8545")]
    rpc_urls: Vec<String>,

    /// ABI file or built-in name (erc20, erc721)
    #[arg(short, long)]
    abi: String,

    /// Contract address (repeatable)
    #[arg(short, long = "contract")]
    contracts: Vec<String>,

    /// File with one contract address per line
    #[arg(long)]
    contracts_file: Option<PathBuf>,

    /// Path to the scan state RocksDB directory (in-memory state when omitted)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Path to a block index consulted before the RPC node
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// First block to process
    #[arg(long)]
    start: Option<u64>,

    /// Stop after this block
    #[arg(long)]
    end: Option<u64>,

    #[arg(long, default_value_t = 15)]
    confirmations: u64,

    /// Blocks re-processed on restart (defaults to --confirmations)
    #[arg(long)]
    reorg_margin: Option<u64>,

    #[arg(long, default_value_t = 100)]
    min_blocks_batch: u64,

    #[arg(long, default_value_t = 1000)]
    max_blocks_batch: u64,

    /// Only scan events, skip per-block call crawling
    #[arg(long)]
    only_events: bool,

    /// Append decoded records to this JSONL file
    #[arg(short, long)]
    outfile: Option<PathBuf>,

    /// Leave event block timestamps empty
    #[arg(long)]
    skip_timestamps: bool,

    /// RPC request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Args {
    fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            num_confirmations: self.confirmations,
            reorg_margin: self.reorg_margin,
            start_block: self.start,
            end_block: self.end,
            min_blocks_batch: self.min_blocks_batch,
            max_blocks_batch: self.max_blocks_batch,
            only_events: self.only_events,
            scanner: ScannerConfig {
                skip_block_timestamp: self.skip_timestamps,
                ..ScannerConfig::default()
            },
            ..WatchConfig::default()
        }
    }
}

struct Setup {
    rotation: EndpointRotation,
    state: Box<dyn ScanState>,
    decoder: Arc<abiscan::abi::AbiDecoder>,
    addresses: Vec<Address>,
    config: WatchConfig,
    sink: Option<JsonlSink>,
}

async fn watch<C: SourceConnector>(
    connector: C,
    setup: Setup,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut watch_loop = WatchLoop::new(
        connector,
        setup.rotation,
        setup.state,
        setup.decoder,
        setup.addresses,
        setup.config,
    )
    .await
    .context("Failed to initialize watcher")?;
    if let Some(sink) = setup.sink {
        watch_loop = watch_loop.with_sink(sink);
    }

    match watch_loop.run(shutdown).await {
        Ok(summary) => {
            info!(
                last_committed = ?summary.last_committed,
                cycles = summary.cycles,
                calls = summary.calls,
                events = summary.events,
                reconnects = summary.reconnects,
                "Watcher stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(last_committed = ?e.last_committed(), "Watcher failed");
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("Starting contract watcher");
    info!("RPC URLs: {:?}", args.rpc_urls);
    info!("ABI: {}", args.abi);

    let decoder = Arc::new(load_abi(&args.abi)?);
    let addresses = collect_addresses(&args.contracts, args.contracts_file.as_deref())?;
    info!("Watching {} contracts", addresses.len());

    let state: Box<dyn ScanState> = match &args.db_path {
        Some(path) => {
            info!("Database: {:?}", path);
            Box::new(
                RocksScanState::open(path)
                    .with_context(|| format!("Failed to open database at {:?}", path))?,
            )
        }
        None => {
            warn!("No --db-path given, progress will not survive a restart");
            Box::new(MemoryState::new())
        }
    };

    let sink = args.outfile.as_ref().map(JsonlSink::open).transpose()?;
    let setup = Setup {
        rotation: EndpointRotation::new(args.rpc_urls.clone())?,
        state,
        decoder,
        addresses,
        config: args.watch_config(),
        sink,
    };

    // Ctrl+C stops the loop between cycles
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                shutdown_tx.closed().await;
            }
        }
    });

    let rpc = RpcConnector {
        timeout: Duration::from_secs(args.timeout),
        ..RpcConnector::default()
    };
    match &args.index_path {
        Some(path) => {
            info!("Block index: {:?}", path);
            let index = RocksBlockIndex::open(path)
                .with_context(|| format!("Failed to open block index at {:?}", path))?;
            let connector = HybridConnector {
                rpc,
                index: Arc::new(index),
            };
            watch(connector, setup, shutdown_rx).await
        }
        None => watch(rpc, setup, shutdown_rx).await,
    }
}
