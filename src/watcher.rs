//! Main watcher loop
//!
//! Polls the chain head, crawls and scans newly confirmed blocks of the
//! watched contracts, commits them to the scan state and optionally
//! appends them to a JSONL file. Data-source failures trigger a bounded
//! reconnection (rotating through the configured endpoints) before the
//! loop resumes at the same block. A block that keeps failing across
//! reconnects, or a scan state that cannot commit, ends the run.

use crate::abi::AbiDecoder;
use crate::crawler::FunctionCallCrawler;
use crate::records::{CrawlRecord, DecodedCall, DecodedEvent};
use crate::rpc::{EndpointRotation, RpcClient};
use crate::scanner::{ChunkSizer, CrawlError, EventScanner, ScannerConfig};
use crate::sink::JsonlSink;
use crate::source::{BlockIndex, ChainDataSource, HybridDataSource, RpcDataSource};
use crate::state::{commit_with_retry, ScanState};
use alloy_primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Builds a data source for an endpoint.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    type Source: ChainDataSource;

    async fn connect(&self, endpoint: &str) -> anyhow::Result<Self::Source>;
}

/// Connects straight to a JSON-RPC node.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    pub timeout: Duration,
    pub cache_size: usize,
}

impl Default for RpcConnector {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            cache_size: crate::cache::DEFAULT_BLOCK_CACHE_SIZE,
        }
    }
}

#[async_trait]
impl SourceConnector for RpcConnector {
    type Source = RpcDataSource;

    async fn connect(&self, endpoint: &str) -> anyhow::Result<RpcDataSource> {
        let client = RpcClient::new(endpoint, self.timeout)?;
        Ok(RpcDataSource::with_cache_size(client, self.cache_size))
    }
}

/// Connects to a JSON-RPC node fronted by a block index.
pub struct HybridConnector<I> {
    pub rpc: RpcConnector,
    pub index: I,
}

#[async_trait]
impl<I: BlockIndex + Clone + 'static> SourceConnector for HybridConnector<I> {
    type Source = HybridDataSource<RpcDataSource, I>;

    async fn connect(&self, endpoint: &str) -> anyhow::Result<Self::Source> {
        let primary = self.rpc.connect(endpoint).await?;
        Ok(HybridDataSource::new(primary, self.index.clone()))
    }
}

/// Watch loop settings.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Blocks behind the head considered final
    pub num_confirmations: u64,
    /// Blocks re-processed when resuming from saved progress (defaults to `num_confirmations`)
    pub reorg_margin: Option<u64>,
    pub start_block: Option<u64>,
    /// Stop once this block has been processed
    pub end_block: Option<u64>,
    pub min_blocks_batch: u64,
    pub max_blocks_batch: u64,
    pub batch_growth_factor: f64,
    pub initial_sleep: Duration,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    /// Scan events only, skipping per-block call crawling
    pub only_events: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub scanner: ScannerConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            num_confirmations: 15,
            reorg_margin: None,
            start_block: None,
            end_block: None,
            min_blocks_batch: 100,
            max_blocks_batch: 1000,
            batch_growth_factor: 2.0,
            initial_sleep: Duration::from_secs(3),
            min_sleep: Duration::from_millis(500),
            max_sleep: Duration::from_secs(60),
            only_events: false,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
            scanner: ScannerConfig::default(),
        }
    }
}

impl WatchConfig {
    pub fn reorg_margin(&self) -> u64 {
        self.reorg_margin.unwrap_or(self.num_confirmations)
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to determine start block: {0:#}")]
    Startup(#[source] anyhow::Error),

    #[error(
        "Reconnection failed after {attempts} attempts, last committed block {last_committed:?}: {source:#}"
    )]
    ReconnectExhausted {
        attempts: u32,
        last_committed: Option<u64>,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to commit scan state, last committed block {last_committed:?}: {source:#}")]
    Persistence {
        last_committed: Option<u64>,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "Block {block} failed {failures} consecutive cycles, last committed block {last_committed:?}: {source:#}"
    )]
    Stalled {
        block: u64,
        failures: u32,
        last_committed: Option<u64>,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write output, last committed block {last_committed:?}: {source:#}")]
    Output {
        last_committed: Option<u64>,
        #[source]
        source: anyhow::Error,
    },
}

impl WatchError {
    /// Last block known to be committed when the loop stopped.
    pub fn last_committed(&self) -> Option<u64> {
        match self {
            WatchError::Startup(_) => None,
            WatchError::ReconnectExhausted { last_committed, .. }
            | WatchError::Persistence { last_committed, .. }
            | WatchError::Stalled { last_committed, .. }
            | WatchError::Output { last_committed, .. } => *last_committed,
        }
    }
}

/// Totals of a finished watch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub last_committed: Option<u64>,
    pub cycles: u64,
    pub idle_cycles: u64,
    pub calls: usize,
    pub events: usize,
    pub reconnects: u32,
}

enum Cycle {
    Idle,
    Processed {
        until: u64,
        calls: Vec<DecodedCall>,
        events: Vec<DecodedEvent>,
    },
}

/// Continuous polling driver for one set of watched contracts.
pub struct WatchLoop<C: SourceConnector, S: ScanState> {
    connector: C,
    rotation: EndpointRotation,
    source: C::Source,
    state: S,
    crawler: FunctionCallCrawler,
    scanner: EventScanner,
    config: WatchConfig,
    sink: Option<JsonlSink>,
    last_committed: Option<u64>,
}

impl<C: SourceConnector, S: ScanState> WatchLoop<C, S> {
    /// Connect to the first endpoint of `rotation` and set up the loop.
    pub async fn new(
        connector: C,
        rotation: EndpointRotation,
        state: S,
        decoder: Arc<AbiDecoder>,
        addresses: Vec<Address>,
        config: WatchConfig,
    ) -> anyhow::Result<Self> {
        let source = connector
            .connect(rotation.current())
            .await
            .with_context(|| format!("Failed to connect to {}", rotation.current()))?;
        let last_committed = state
            .last_scanned_block()
            .context("Failed to read scan progress")?;

        Ok(Self {
            connector,
            rotation,
            source,
            state,
            crawler: FunctionCallCrawler::new(decoder.clone(), addresses.clone()),
            scanner: EventScanner::new(decoder, addresses, config.scanner.clone()),
            config,
            sink: None,
            last_committed,
        })
    }

    /// Append every committed record to `sink`.
    pub fn with_sink(mut self, sink: JsonlSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_crawler(mut self, crawler: FunctionCallCrawler) -> Self {
        self.crawler = crawler;
        self
    }

    pub fn with_scanner(mut self, scanner: EventScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn source(&self) -> &C::Source {
        &self.source
    }

    pub fn into_state(self) -> S {
        self.state
    }

    /// Run until `shutdown` flips to true, the end block is processed or
    /// reconnection is exhausted.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<WatchSummary, WatchError> {
        let mut current = self.start_block().await?;
        let mut batch = ChunkSizer::new(
            self.config.min_blocks_batch,
            self.config.max_blocks_batch,
            self.config.min_blocks_batch,
            self.config.batch_growth_factor,
        );
        let mut sleep = self.config.initial_sleep;
        let mut summary = WatchSummary::default();
        // Failed cycles since the last one that completed; bounds retries
        // of one block across reconnects
        let mut failures: u32 = 0;

        info!(
            start_block = current,
            confirmations = self.config.num_confirmations,
            only_events = self.config.only_events,
            "Starting watch loop"
        );

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }
            if self.config.end_block.is_some_and(|end| current > end) {
                info!(end_block = ?self.config.end_block, "Reached end block");
                break;
            }

            summary.cycles += 1;
            match self.cycle(current, batch.current()).await {
                Ok(Cycle::Idle) => {
                    failures = 0;
                    summary.idle_cycles += 1;
                    sleep = (sleep * 2).min(self.config.max_sleep);
                    debug!(current_block = current, sleep = ?sleep, "Nothing confirmed yet");
                }
                Ok(Cycle::Processed { until, calls, events }) => {
                    failures = 0;
                    sleep = (sleep / 2).max(self.config.min_sleep);
                    info!(
                        from_block = current,
                        to_block = until,
                        calls = calls.len(),
                        events = events.len(),
                        "Processed blocks"
                    );
                    summary.calls += calls.len();
                    summary.events += events.len();
                    self.write_output(calls, &events)?;
                    if self.config.only_events {
                        batch.next(events.len());
                    }
                    current = until + 1;
                }
                Err(e) if e.is_not_found() => {
                    self.state.abort_chunk();
                    summary.idle_cycles += 1;
                    sleep = (sleep * 2).min(self.config.max_sleep);
                    debug!(current_block = current, error = %e, "Block not visible yet");
                }
                Err(CrawlError::Persistence(source)) => {
                    self.state.abort_chunk();
                    error!(current_block = current, error = %source, "Scan state commit failed");
                    return Err(WatchError::Persistence {
                        last_committed: self.last_committed,
                        source,
                    });
                }
                Err(e) => {
                    self.state.abort_chunk();
                    failures += 1;
                    warn!(current_block = current, failures, error = %e, "Watch cycle failed");
                    if failures > self.config.reconnect_attempts.max(1) {
                        return Err(WatchError::Stalled {
                            block: current,
                            failures,
                            last_committed: self.last_committed,
                            source: e.into(),
                        });
                    }
                    self.reconnect(e.into()).await?;
                    summary.reconnects += 1;
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed");
                        break;
                    }
                }
            }
        }

        summary.last_committed = self.last_committed;
        Ok(summary)
    }

    /// Startup block: explicit start, saved progress minus the reorg
    /// margin, or a lookback of twice the confirmations from the head.
    async fn start_block(&mut self) -> Result<u64, WatchError> {
        if let Some(start) = self.config.start_block {
            return Ok(start);
        }

        let saved = self
            .state
            .last_scanned_block()
            .map_err(WatchError::Startup)?;
        if saved.is_some() {
            let start = EventScanner::resume_block(&mut self.state, self.config.reorg_margin())
                .map_err(WatchError::Startup)?;
            self.last_committed = self
                .state
                .last_scanned_block()
                .map_err(WatchError::Startup)?;
            return Ok(start);
        }

        let head = self
            .source
            .last_block_number()
            .await
            .context("Failed to get chain head")
            .map_err(WatchError::Startup)?;
        Ok(head.saturating_sub(self.config.num_confirmations * 2))
    }

    async fn cycle(&mut self, current: u64, batch_size: u64) -> Result<Cycle, CrawlError> {
        let head = self.source.last_block_number().await?;
        let Some(confirmed) = head.checked_sub(self.config.num_confirmations) else {
            return Ok(Cycle::Idle);
        };
        let mut until = confirmed.min(current.saturating_add(batch_size));
        if let Some(end) = self.config.end_block {
            until = until.min(end);
        }
        if until < current {
            return Ok(Cycle::Idle);
        }

        self.state
            .start_chunk(current, until - current + 1)
            .map_err(CrawlError::Persistence)?;

        let calls = if self.config.only_events {
            Vec::new()
        } else {
            self.crawler
                .crawl(&self.source, &mut self.state, current, until)
                .await?
                .calls
        };

        let events = self.scanner.collect_range(&self.source, current, until).await?;
        for event in &events {
            self.state
                .register_event(event.clone())
                .map_err(CrawlError::Persistence)?;
        }

        commit_with_retry(&mut self.state, until).map_err(CrawlError::Persistence)?;
        self.last_committed = Some(self.last_committed.map_or(until, |last| last.max(until)));

        Ok(Cycle::Processed { until, calls, events })
    }

    fn write_output(&mut self, calls: Vec<DecodedCall>, events: &[DecodedEvent]) -> Result<(), WatchError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let records = calls
            .into_iter()
            .map(CrawlRecord::Call)
            .chain(events.iter().cloned().map(CrawlRecord::Event));
        for record in records {
            sink.write(&record).map_err(|source| WatchError::Output {
                last_committed: self.last_committed,
                source,
            })?;
        }
        Ok(())
    }

    /// Reconnect through the endpoint rotation and re-check the state.
    async fn reconnect(&mut self, cause: anyhow::Error) -> Result<(), WatchError> {
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last_error = cause;
        for attempt in 1..=attempts {
            if !self.config.reconnect_delay.is_zero() {
                tokio::time::sleep(self.config.reconnect_delay).await;
            }
            let endpoint = self.rotation.advance().to_string();
            warn!(attempt, attempts, endpoint = %endpoint, "Reconnecting data source");

            match self.try_connect(&endpoint).await {
                Ok(source) => {
                    self.source = source;
                    info!(endpoint = %endpoint, "Reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, endpoint = %endpoint, error = %e, "Reconnection attempt failed");
                    last_error = e;
                }
            }
        }

        Err(WatchError::ReconnectExhausted {
            attempts,
            last_committed: self.last_committed,
            source: last_error,
        })
    }

    async fn try_connect(&self, endpoint: &str) -> anyhow::Result<C::Source> {
        let source = self.connector.connect(endpoint).await?;
        source
            .last_block_number()
            .await
            .context("Data source health check failed")?;
        self.state.verify().context("Scan state health check failed")?;
        Ok(source)
    }
}
