//! Adaptive event scanning
//!
//! `EventScanner` walks a block range with `eth_getLogs`-style range
//! queries. The chunk size adapts to what it finds: empty chunks grow the
//! next one, a chunk with matches drops back to the minimum so dense
//! regions are scanned finely. Every chunk is committed before the next
//! one starts.

use crate::abi::{warn_on_decode_failure, AbiDecoder, DecodeErrorHandler, DecodeFailure};
use crate::fetcher::{fetch_with_shrink, FetchError, RetryPolicy};
use crate::records::DecodedEvent;
use crate::source::{ChainDataSource, SourceError};
use crate::state::{commit_with_retry, ScanState};
use alloy_primitives::{Address, B256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that end a crawl or scan step.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl CrawlError {
    /// True when the step failed only because a block is not visible yet.
    pub fn is_not_found(&self) -> bool {
        match self {
            CrawlError::Source(e) => e.is_not_found(),
            CrawlError::Fetch(e) => e.source_error().is_not_found(),
            CrawlError::Persistence(_) => false,
        }
    }
}

/// Chunk size controller.
///
/// Resets to `min` after a chunk with matches, otherwise multiplies by the
/// growth factor up to `max`.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    min: u64,
    max: u64,
    growth_factor: f64,
    current: u64,
}

impl ChunkSizer {
    pub fn new(min: u64, max: u64, start: u64, growth_factor: f64) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            max,
            growth_factor,
            current: start.clamp(min, max),
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Size of the next chunk after one that yielded `found` records.
    pub fn next(&mut self, found: usize) -> u64 {
        self.current = if found > 0 {
            self.min
        } else {
            let grown = (self.current as f64 * self.growth_factor) as u64;
            grown.max(self.current + 1).min(self.max)
        };
        self.current
    }
}

/// Event scanner settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub start_chunk_size: u64,
    pub chunk_growth_factor: f64,
    pub retry: RetryPolicy,
    /// Leave `block_timestamp` empty instead of looking it up
    pub skip_block_timestamp: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 10,
            max_chunk_size: 10_000,
            start_chunk_size: 20,
            chunk_growth_factor: 2.0,
            retry: RetryPolicy::default(),
            skip_block_timestamp: false,
        }
    }
}

impl ScannerConfig {
    fn sizer(&self) -> ChunkSizer {
        ChunkSizer::new(
            self.min_chunk_size,
            self.max_chunk_size,
            self.start_chunk_size,
            self.chunk_growth_factor,
        )
    }
}

/// Outcome of one committed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    pub start: u64,
    /// Last block covered, possibly below the requested end after shrinking
    pub end: u64,
    /// Requested chunk size
    pub size: u64,
    pub events: usize,
}

/// Progress notification sent after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub start: u64,
    pub end: u64,
    pub current: u64,
    pub chunk_size: u64,
    pub events_found: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub chunks: Vec<ChunkReport>,
    pub events: usize,
    /// Last committed block, None when the range was empty
    pub last_block: Option<u64>,
}

/// Scans event logs of a set of contracts.
pub struct EventScanner {
    decoder: Arc<AbiDecoder>,
    addresses: Vec<Address>,
    signatures: Vec<B256>,
    config: ScannerConfig,
    on_decode_error: DecodeErrorHandler,
}

impl EventScanner {
    pub fn new(decoder: Arc<AbiDecoder>, addresses: Vec<Address>, config: ScannerConfig) -> Self {
        let signatures = decoder.event_signatures();
        Self {
            decoder,
            addresses,
            signatures,
            config,
            on_decode_error: warn_on_decode_failure(),
        }
    }

    /// Replace the handler invoked for undecodable logs.
    pub fn with_decode_error_handler(mut self, handler: DecodeErrorHandler) -> Self {
        self.on_decode_error = handler;
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Block to resume from, after deleting data that may have been reorged.
    ///
    /// Returns `max(1, last_scanned - margin)`, or 1 without prior progress,
    /// and deletes every record at or after that block.
    pub fn resume_block<S: ScanState + ?Sized>(state: &mut S, margin: u64) -> anyhow::Result<u64> {
        let start = match state.last_scanned_block()? {
            Some(last) => last.saturating_sub(margin).max(1),
            None => 1,
        };
        state.delete_since(start)?;
        info!(resume_block = start, margin, "Resuming scan");
        Ok(start)
    }

    /// Query and decode one chunk.
    ///
    /// Returns the end block actually covered (the fetcher may have shrunk
    /// the range) and the decoded events in provider order.
    pub async fn scan_chunk<C>(
        &self,
        source: &C,
        start: u64,
        end: u64,
    ) -> Result<(u64, Vec<DecodedEvent>), CrawlError>
    where
        C: ChainDataSource + ?Sized,
    {
        if self.signatures.is_empty() {
            return Ok((end, Vec::new()));
        }

        let signatures = self.signatures.as_slice();
        let addresses = self.addresses.as_slice();
        let (end, logs) = fetch_with_shrink(&self.config.retry, start, end, move |from, to| {
            source.logs(signatures, from, to, addresses)
        })
        .await?;

        let mut timestamps: HashMap<u64, Option<u64>> = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                continue;
            }
            let decoded = match self.decoder.decode_log(&log) {
                Ok(decoded) => decoded,
                Err(error) => {
                    (self.on_decode_error)(&DecodeFailure {
                        block_number: log.block_number,
                        transaction_hash: log.transaction_hash,
                        log_index: log.log_index,
                        error,
                    });
                    continue;
                }
            };
            let (Some(block_number), Some(transaction_hash), Some(log_index)) =
                (log.block_number, log.transaction_hash, log.log_index)
            else {
                continue;
            };

            let block_timestamp = if self.config.skip_block_timestamp {
                None
            } else if let Some(cached) = timestamps.get(&block_number) {
                *cached
            } else {
                let timestamp = match source.block_timestamp(block_number).await {
                    Ok(timestamp) => Some(timestamp),
                    Err(SourceError::BlockNotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                timestamps.insert(block_number, timestamp);
                timestamp
            };

            events.push(DecodedEvent {
                event_name: decoded.name.clone(),
                args: decoded.args_json(),
                address: log.address,
                block_number,
                block_timestamp,
                transaction_hash,
                log_index,
            });
        }

        debug!(start_block = start, end_block = end, events = events.len(), "Scanned chunk");
        Ok((end, events))
    }

    /// Scan `[start, end]`, committing each chunk to `state`.
    ///
    /// `progress` is called after every committed chunk.
    pub async fn scan<C, S>(
        &self,
        source: &C,
        state: &mut S,
        start: u64,
        end: u64,
        mut progress: Option<&mut dyn FnMut(&ScanProgress)>,
    ) -> Result<ScanReport, CrawlError>
    where
        C: ChainDataSource + ?Sized,
        S: ScanState + ?Sized,
    {
        let mut sizer = self.config.sizer();
        let mut report = ScanReport::default();
        let mut current = start;

        while current <= end {
            let size = sizer.current();
            let chunk_end = current.saturating_add(size - 1).min(end);
            state
                .start_chunk(current, size)
                .map_err(CrawlError::Persistence)?;

            let (chunk_end, events) = match self.scan_chunk(source, current, chunk_end).await {
                Ok(result) => result,
                Err(e) => {
                    state.abort_chunk();
                    return Err(e);
                }
            };

            let found = events.len();
            for event in events {
                if let Err(e) = state.register_event(event) {
                    state.abort_chunk();
                    return Err(CrawlError::Persistence(e));
                }
            }
            if let Err(e) = commit_with_retry(state, chunk_end) {
                state.abort_chunk();
                return Err(CrawlError::Persistence(e));
            }

            report.chunks.push(ChunkReport {
                start: current,
                end: chunk_end,
                size,
                events: found,
            });
            report.events += found;
            report.last_block = Some(chunk_end);
            if let Some(callback) = progress.as_mut() {
                callback(&ScanProgress {
                    start,
                    end,
                    current: chunk_end,
                    chunk_size: size,
                    events_found: found,
                });
            }

            sizer.next(found);
            if chunk_end == u64::MAX {
                break;
            }
            current = chunk_end + 1;
        }

        info!(
            start_block = start,
            end_block = end,
            chunks = report.chunks.len(),
            events = report.events,
            "Event scan finished"
        );
        Ok(report)
    }

    /// Decode all events in `[start, end]` without touching any state.
    ///
    /// Uses the same adaptive chunking as `scan`. The caller decides how
    /// to register and commit the result.
    pub async fn collect_range<C>(
        &self,
        source: &C,
        start: u64,
        end: u64,
    ) -> Result<Vec<DecodedEvent>, CrawlError>
    where
        C: ChainDataSource + ?Sized,
    {
        let mut sizer = self.config.sizer();
        let mut collected = Vec::new();
        let mut current = start;
        while current <= end {
            let chunk_end = current.saturating_add(sizer.current() - 1).min(end);
            let (chunk_end, events) = self.scan_chunk(source, current, chunk_end).await?;
            sizer.next(events.len());
            collected.extend(events);
            if chunk_end == u64::MAX {
                break;
            }
            current = chunk_end + 1;
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ERC20_ABI;
    use crate::state::MemoryState;
    use crate::test_helpers::{transfer_log, MockSource};
    use std::sync::Mutex;
    use std::time::Duration;

    fn scanner(config: ScannerConfig) -> EventScanner {
        let decoder = Arc::new(AbiDecoder::from_json(ERC20_ABI).unwrap());
        EventScanner::new(decoder, vec![Address::repeat_byte(0xcc)], config)
    }

    fn fast_config(min: u64, max: u64) -> ScannerConfig {
        ScannerConfig {
            min_chunk_size: min,
            max_chunk_size: max,
            start_chunk_size: min,
            retry: RetryPolicy {
                max_retries: 3,
                delay: Duration::ZERO,
            },
            ..ScannerConfig::default()
        }
    }

    #[test]
    fn test_chunk_sizer_grows_and_resets() {
        let mut sizer = ChunkSizer::new(10, 100, 20, 2.0);
        assert_eq!(sizer.current(), 20);
        assert_eq!(sizer.next(0), 40);
        assert_eq!(sizer.next(0), 80);
        assert_eq!(sizer.next(0), 100);
        assert_eq!(sizer.next(0), 100);
        assert_eq!(sizer.next(3), 10);

        // A factor that would round down still makes progress
        let mut sizer = ChunkSizer::new(1, 10, 1, 1.2);
        assert_eq!(sizer.next(0), 2);
    }

    #[tokio::test]
    async fn test_adaptive_batch_sizing() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(200);
        for block in 101..=110 {
            source.add_log(transfer_log(contract, block, 0, 1));
        }

        let scanner = scanner(fast_config(1, 1000));
        let mut state = MemoryState::new();
        let report = scanner.scan(&source, &mut state, 1, 130, None).await.unwrap();

        let sizes: Vec<u64> = report.chunks.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![1, 2, 4, 8, 16, 32, 64, 1, 2]);
        assert_eq!(report.chunks[6], ChunkReport { start: 64, end: 127, size: 64, events: 10 });
        assert_eq!(report.events, 10);
        assert_eq!(state.events().len(), 10);
        assert_eq!(state.last_scanned_block().unwrap(), Some(130));
    }

    #[tokio::test]
    async fn test_progress_callback_and_monotonic_commits() {
        let source = MockSource::new(100);
        let scanner = scanner(fast_config(5, 20));
        let mut state = MemoryState::new();

        let mut seen = Vec::new();
        let mut record = |p: &ScanProgress| seen.push(p.current);
        scanner
            .scan(&source, &mut state, 1, 60, Some(&mut record))
            .await
            .unwrap();

        assert_eq!(seen.last(), Some(&60));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(50);
        source.add_log(transfer_log(contract, 7, 0, 1));
        source.add_log(transfer_log(contract, 7, 1, 2));
        source.add_log(transfer_log(contract, 30, 0, 3));

        let scanner = scanner(fast_config(10, 100));
        let mut state = MemoryState::new();
        scanner.scan(&source, &mut state, 1, 40, None).await.unwrap();
        let first: Vec<DecodedEvent> = state.events().into_iter().cloned().collect();

        scanner.scan(&source, &mut state, 1, 40, None).await.unwrap();
        let second: Vec<DecodedEvent> = state.events().into_iter().cloned().collect();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_failing_chunk_is_shrunk() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(100);
        source.add_log(transfer_log(contract, 3, 0, 1));
        source.set_max_log_range(4);

        let scanner = scanner(fast_config(20, 20));
        let mut state = MemoryState::new();
        let report = scanner.scan(&source, &mut state, 1, 20, None).await.unwrap();

        // 1..20 -> 1..10 -> 1..5 fits the provider limit
        assert_eq!(report.chunks[0].end, 5);
        assert_eq!(state.events().len(), 1);
        assert_eq!(state.last_scanned_block().unwrap(), Some(20));
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_state_untouched() {
        let source = MockSource::new(100);
        source.fail_logs_always();

        let scanner = scanner(fast_config(10, 10));
        let mut state = MemoryState::new();
        let err = scanner.scan(&source, &mut state, 1, 20, None).await.unwrap_err();
        assert!(matches!(err, CrawlError::Fetch(_)));
        assert_eq!(state.last_scanned_block().unwrap(), None);
    }

    /// Accepts records but never commits them.
    #[derive(Default)]
    struct FullDisk {
        inner: MemoryState,
    }

    impl ScanState for FullDisk {
        fn last_scanned_block(&self) -> anyhow::Result<Option<u64>> {
            self.inner.last_scanned_block()
        }

        fn register_call(&mut self, call: crate::records::DecodedCall) -> anyhow::Result<()> {
            self.inner.register_call(call)
        }

        fn register_event(&mut self, event: DecodedEvent) -> anyhow::Result<()> {
            self.inner.register_event(event)
        }

        fn end_chunk(&mut self, _end: u64) -> anyhow::Result<()> {
            anyhow::bail!("no space left on device")
        }

        fn abort_chunk(&mut self) {
            self.inner.abort_chunk();
        }

        fn delete_since(&mut self, block: u64) -> anyhow::Result<()> {
            self.inner.delete_since(block)
        }
    }

    #[tokio::test]
    async fn test_failed_commit_drops_pending_records() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(100);
        source.add_log(transfer_log(contract, 5, 0, 1));
        source.add_log(transfer_log(contract, 6, 0, 2));

        let scanner = scanner(fast_config(10, 10));
        let mut state = FullDisk::default();
        let err = scanner.scan(&source, &mut state, 1, 20, None).await.unwrap_err();
        assert!(matches!(err, CrawlError::Persistence(_)));
        assert_eq!(state.inner.pending_len(), 0);
        assert_eq!(state.last_scanned_block().unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecodable_logs_are_reported_and_skipped() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(20);
        source.add_log(transfer_log(contract, 4, 0, 1));
        let mut broken = transfer_log(contract, 4, 1, 2);
        broken.topics.truncate(1);
        source.add_log(broken);

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let scanner = scanner(fast_config(10, 10)).with_decode_error_handler(Arc::new(
            move |failure: &DecodeFailure| {
                sink.lock().unwrap().push(failure.log_index);
            },
        ));

        let events = scanner.collect_range(&source, 1, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_timestamp, Some(source.timestamp_of(4)));
        assert_eq!(*failures.lock().unwrap(), vec![Some(1)]);
    }

    #[tokio::test]
    async fn test_skip_block_timestamp() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(20);
        source.add_log(transfer_log(contract, 4, 0, 1));

        let config = ScannerConfig {
            skip_block_timestamp: true,
            ..fast_config(10, 10)
        };
        let events = scanner(config).collect_range(&source, 1, 10).await.unwrap();
        assert_eq!(events[0].block_timestamp, None);
        assert_eq!(source.block_requests(), 0);
    }

    #[tokio::test]
    async fn test_resume_block_deletes_margin() {
        let contract = Address::repeat_byte(0xcc);
        let source = MockSource::new(100);
        source.add_log(transfer_log(contract, 45, 0, 1));
        source.add_log(transfer_log(contract, 55, 0, 2));

        let scanner = scanner(fast_config(100, 100));
        let mut state = MemoryState::new();
        scanner.scan(&source, &mut state, 1, 60, None).await.unwrap();
        assert_eq!(state.events().len(), 2);

        let resume = EventScanner::resume_block(&mut state, 10).unwrap();
        assert_eq!(resume, 50);
        assert_eq!(state.events().len(), 1);
        assert_eq!(state.last_scanned_block().unwrap(), Some(49));

        let mut fresh = MemoryState::new();
        assert_eq!(EventScanner::resume_block(&mut fresh, 10).unwrap(), 1);
    }
}
