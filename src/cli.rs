//! CLI implementation for scanctl
//!
//! Operator commands for inspecting and repairing the scan database,
//! running one-shot historical scans and populating the block index.
//! All commands output pretty JSON.

use crate::config::{collect_addresses, load_abi, parse_address};
use crate::deployment::find_deployment_block;
use crate::rpc::RpcClient;
use crate::scanner::{EventScanner, ScanProgress, ScannerConfig};
use crate::source::{ChainDataSource, RpcDataSource};
use crate::state::ScanState;
use crate::store::{RocksBlockIndex, RocksScanState};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Contract scan CLI tool
#[derive(Parser)]
#[command(name = "scanctl")]
#[command(about = "Inspect and populate the contract scan database")]
pub struct Cli {
    /// Path to the scan state RocksDB directory
    #[arg(short, long, default_value = "./scan_db")]
    db_path: PathBuf,

    /// RPC endpoint URL for commands that read the chain
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// RPC request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the last fully scanned block
    Head,
    /// List decoded calls in a block range
    Calls {
        from: u64,
        to: u64,
    },
    /// List decoded events in a block range
    Events {
        from: u64,
        to: u64,
    },
    /// Delete all records at or after a block and rewind progress
    DeleteSince {
        block: u64,
    },
    /// Scan historical events into the state database
    Scan {
        /// ABI file or built-in name (erc20, erc721)
        #[arg(long)]
        abi: String,
        /// Contract address (repeatable)
        #[arg(long = "contract")]
        contracts: Vec<String>,
        /// File with one contract address per line
        #[arg(long)]
        contracts_file: Option<PathBuf>,
        /// First block (defaults to saved progress minus the reorg margin)
        #[arg(long)]
        start: Option<u64>,
        /// Last block (defaults to head minus confirmations)
        #[arg(long)]
        end: Option<u64>,
        #[arg(long, default_value_t = 15)]
        confirmations: u64,
        /// Blocks re-scanned when resuming (defaults to --confirmations)
        #[arg(long)]
        reorg_margin: Option<u64>,
        #[arg(long, default_value_t = 10)]
        min_chunk: u64,
        #[arg(long, default_value_t = 10_000)]
        max_chunk: u64,
        /// Leave block timestamps empty
        #[arg(long)]
        skip_timestamps: bool,
    },
    /// Copy blocks and transactions from RPC into the block index
    IndexBlocks {
        /// Path to the block index RocksDB directory
        #[arg(long, default_value = "./block_index")]
        index_path: PathBuf,
        from: u64,
        to: u64,
    },
    /// Find the block a contract was deployed in
    FindDeployment {
        address: String,
        /// Pause between RPC calls in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

/// Number of blocks in `[from, to]`, rejecting reversed ranges.
fn block_count(from: u64, to: u64) -> Result<u64> {
    if from > to {
        anyhow::bail!("Invalid block range: {} > {}", from, to);
    }
    Ok(to - from + 1)
}

impl Cli {
    fn rpc_source(&self) -> Result<RpcDataSource> {
        let client = RpcClient::new(self.rpc_url.clone(), Duration::from_secs(self.timeout))?;
        Ok(RpcDataSource::new(client))
    }

    fn open_state(&self) -> Result<RocksScanState> {
        RocksScanState::open(&self.db_path)
            .with_context(|| format!("Failed to open database at {:?}", self.db_path))
    }
}

/// Run the CLI command and print JSON output.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Head => {
            let state = cli.open_state()?;
            json!({ "last_scanned_block": state.last_scanned_block()? })
        }
        Commands::Calls { from, to } => {
            let state = cli.open_state()?;
            let calls = state.calls_in_range(*from, *to)?;
            json!({
                "from_block": from,
                "to_block": to,
                "count": calls.len(),
                "calls": calls,
            })
        }
        Commands::Events { from, to } => {
            let state = cli.open_state()?;
            let events = state.events_in_range(*from, *to)?;
            json!({
                "from_block": from,
                "to_block": to,
                "count": events.len(),
                "events": events,
            })
        }
        Commands::DeleteSince { block } => {
            let mut state = cli.open_state()?;
            state.delete_since(*block)?;
            json!({
                "status": "ok",
                "deleted_since": block,
                "last_scanned_block": state.last_scanned_block()?,
            })
        }
        Commands::Scan {
            abi,
            contracts,
            contracts_file,
            start,
            end,
            confirmations,
            reorg_margin,
            min_chunk,
            max_chunk,
            skip_timestamps,
        } => {
            let decoder = Arc::new(load_abi(abi)?);
            let addresses = collect_addresses(contracts, contracts_file.as_deref())?;
            let source = cli.rpc_source()?;
            let mut state = cli.open_state()?;

            let start = match start {
                Some(start) => *start,
                None => EventScanner::resume_block(
                    &mut state,
                    reorg_margin.unwrap_or(*confirmations),
                )?,
            };
            let end = match end {
                Some(end) => *end,
                None => source
                    .last_block_number()
                    .await?
                    .saturating_sub(*confirmations),
            };

            let config = ScannerConfig {
                min_chunk_size: *min_chunk,
                max_chunk_size: *max_chunk,
                skip_block_timestamp: *skip_timestamps,
                ..ScannerConfig::default()
            };
            let scanner = EventScanner::new(decoder, addresses, config);

            let mut log_progress = |progress: &ScanProgress| {
                info!(
                    current_block = progress.current,
                    end_block = progress.end,
                    chunk_size = progress.chunk_size,
                    events_found = progress.events_found,
                    "Scan progress"
                );
            };
            let report = scanner
                .scan(&source, &mut state, start, end, Some(&mut log_progress))
                .await?;

            json!({
                "status": "ok",
                "from_block": start,
                "to_block": end,
                "chunks": report.chunks.len(),
                "events": report.events,
                "last_scanned_block": state.last_scanned_block()?,
            })
        }
        Commands::IndexBlocks { index_path, from, to } => {
            let blocks = block_count(*from, *to)?;
            let index = RocksBlockIndex::open(index_path)
                .with_context(|| format!("Failed to open block index at {:?}", index_path))?;
            let client = RpcClient::new(cli.rpc_url.clone(), Duration::from_secs(cli.timeout))?;

            let mut transactions = 0;
            for number in *from..=*to {
                let block = client
                    .get_block_by_number(number, true)
                    .await?
                    .with_context(|| format!("Block {} not found", number))?;
                index.put_block(&block)?;
                transactions += block.transactions.len();
                if number % 100 == 0 {
                    info!(block = number, "Indexed block");
                }
            }

            json!({
                "status": "ok",
                "from_block": from,
                "to_block": to,
                "blocks": blocks,
                "transactions": transactions,
            })
        }
        Commands::FindDeployment { address, interval_ms } => {
            let addr = parse_address(address)?;
            let source = cli.rpc_source()?;
            let interval = interval_ms.map(Duration::from_millis);
            let block = find_deployment_block(&source, addr, interval).await?;
            json!({
                "address": addr.to_checksum(None),
                "deployment_block": block,
            })
        }
    };

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
