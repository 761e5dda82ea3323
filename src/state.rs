//! Scan state
//!
//! `ScanState` tracks the last fully processed block and stores decoded
//! records. Records registered during a chunk stay pending until
//! `end_chunk`, which makes them durable together with the new progress
//! marker. A chunk is therefore either fully committed or not at all.
//!
//! Records are keyed by (block, transaction hash) for calls and by
//! (block, transaction hash, log index) for events. Registering the same
//! record twice overwrites it, so re-scanning a range is idempotent.

use crate::records::{CrawlRecord, DecodedCall, DecodedEvent};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::warn;

/// Persistence interface for scan progress and decoded records.
pub trait ScanState {
    /// Last block whose records are all committed.
    fn last_scanned_block(&self) -> Result<Option<u64>>;

    /// Called before a chunk `[start, start + size)` is processed.
    fn start_chunk(&mut self, _start: u64, _size: u64) -> Result<()> {
        Ok(())
    }

    /// Add a decoded call to the current chunk.
    fn register_call(&mut self, call: DecodedCall) -> Result<()>;

    /// Add a decoded event to the current chunk.
    fn register_event(&mut self, event: DecodedEvent) -> Result<()>;

    /// Commit the pending records and advance progress to `end`.
    ///
    /// Progress never moves backwards here: committing an `end` below the
    /// current marker stores the records and keeps the marker.
    fn end_chunk(&mut self, end: u64) -> Result<()>;

    /// Drop records registered since the last commit.
    fn abort_chunk(&mut self) {}

    /// Delete every record at or after `block` and move progress to `block - 1`.
    fn delete_since(&mut self, block: u64) -> Result<()>;

    /// Check that the backing storage is reachable.
    fn verify(&self) -> Result<()> {
        self.last_scanned_block().map(|_| ())
    }
}

impl<T: ScanState + ?Sized> ScanState for Box<T> {
    fn last_scanned_block(&self) -> Result<Option<u64>> {
        (**self).last_scanned_block()
    }

    fn start_chunk(&mut self, start: u64, size: u64) -> Result<()> {
        (**self).start_chunk(start, size)
    }

    fn register_call(&mut self, call: DecodedCall) -> Result<()> {
        (**self).register_call(call)
    }

    fn register_event(&mut self, event: DecodedEvent) -> Result<()> {
        (**self).register_event(event)
    }

    fn end_chunk(&mut self, end: u64) -> Result<()> {
        (**self).end_chunk(end)
    }

    fn abort_chunk(&mut self) {
        (**self).abort_chunk()
    }

    fn delete_since(&mut self, block: u64) -> Result<()> {
        (**self).delete_since(block)
    }

    fn verify(&self) -> Result<()> {
        (**self).verify()
    }
}

/// Commit a chunk, retrying once before giving up.
pub fn commit_with_retry<S: ScanState + ?Sized>(state: &mut S, end: u64) -> Result<()> {
    match state.end_chunk(end) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(end_block = end, error = %e, "Commit failed, retrying once");
            state
                .end_chunk(end)
                .with_context(|| format!("Failed to commit chunk ending at block {}", end))
        }
    }
}

/// In-memory scan state.
#[derive(Debug, Default)]
pub struct MemoryState {
    calls: BTreeMap<(u64, B256), DecodedCall>,
    events: BTreeMap<(u64, B256, u64), DecodedEvent>,
    pending: Vec<CrawlRecord>,
    last_scanned: Option<u64>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed calls in block order.
    pub fn calls(&self) -> Vec<&DecodedCall> {
        self.calls.values().collect()
    }

    /// Committed events in block order.
    pub fn events(&self) -> Vec<&DecodedEvent> {
        self.events.values().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl ScanState for MemoryState {
    fn last_scanned_block(&self) -> Result<Option<u64>> {
        Ok(self.last_scanned)
    }

    fn register_call(&mut self, call: DecodedCall) -> Result<()> {
        self.pending.push(CrawlRecord::Call(call));
        Ok(())
    }

    fn register_event(&mut self, event: DecodedEvent) -> Result<()> {
        self.pending.push(CrawlRecord::Event(event));
        Ok(())
    }

    fn end_chunk(&mut self, end: u64) -> Result<()> {
        for record in self.pending.drain(..) {
            match record {
                CrawlRecord::Call(call) => {
                    self.calls
                        .insert((call.block_number, call.transaction_hash), call);
                }
                CrawlRecord::Event(event) => {
                    self.events.insert(
                        (event.block_number, event.transaction_hash, event.log_index),
                        event,
                    );
                }
            }
        }
        self.last_scanned = Some(self.last_scanned.map_or(end, |last| last.max(end)));
        Ok(())
    }

    fn abort_chunk(&mut self) {
        self.pending.clear();
    }

    fn delete_since(&mut self, block: u64) -> Result<()> {
        self.calls.retain(|(number, _), _| *number < block);
        self.events.retain(|(number, _, _), _| *number < block);
        self.pending.retain(|record| record.block_number() < block);
        self.last_scanned = match self.last_scanned {
            Some(last) if last >= block => block.checked_sub(1),
            other => other,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{sample_call, sample_event};

    #[test]
    fn test_records_are_pending_until_commit() {
        let mut state = MemoryState::new();
        state.register_call(sample_call(5, 1)).unwrap();
        assert!(state.calls().is_empty());
        assert_eq!(state.last_scanned_block().unwrap(), None);

        state.end_chunk(10).unwrap();
        assert_eq!(state.calls().len(), 1);
        assert_eq!(state.last_scanned_block().unwrap(), Some(10));
    }

    #[test]
    fn test_abort_drops_pending_records() {
        let mut state = MemoryState::new();
        state.register_event(sample_event(5, 1, 0)).unwrap();
        state.abort_chunk();
        state.end_chunk(5).unwrap();
        assert!(state.events().is_empty());
    }

    #[test]
    fn test_register_twice_overwrites() {
        let mut state = MemoryState::new();
        for _ in 0..2 {
            state.register_call(sample_call(5, 1)).unwrap();
            state.register_event(sample_event(5, 1, 0)).unwrap();
            state.end_chunk(5).unwrap();
        }
        assert_eq!(state.calls().len(), 1);
        assert_eq!(state.events().len(), 1);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut state = MemoryState::new();
        state.end_chunk(20).unwrap();
        state.end_chunk(15).unwrap();
        assert_eq!(state.last_scanned_block().unwrap(), Some(20));
    }

    #[test]
    fn test_delete_since_removes_records_and_rewinds() {
        let mut state = MemoryState::new();
        state.register_call(sample_call(5, 1)).unwrap();
        state.register_event(sample_event(8, 2, 0)).unwrap();
        state.register_event(sample_event(12, 3, 1)).unwrap();
        state.end_chunk(12).unwrap();

        state.delete_since(8).unwrap();
        assert_eq!(state.calls().len(), 1);
        assert!(state.events().is_empty());
        assert_eq!(state.last_scanned_block().unwrap(), Some(7));

        // Deleting past the marker leaves it alone
        state.delete_since(50).unwrap();
        assert_eq!(state.last_scanned_block().unwrap(), Some(7));
    }

    /// State whose first `failures` commits fail.
    struct FlakyState {
        inner: MemoryState,
        failures: usize,
        attempts: usize,
    }

    impl ScanState for FlakyState {
        fn last_scanned_block(&self) -> Result<Option<u64>> {
            self.inner.last_scanned_block()
        }

        fn register_call(&mut self, call: DecodedCall) -> Result<()> {
            self.inner.register_call(call)
        }

        fn register_event(&mut self, event: DecodedEvent) -> Result<()> {
            self.inner.register_event(event)
        }

        fn end_chunk(&mut self, end: u64) -> Result<()> {
            self.attempts += 1;
            if self.failures > 0 {
                self.failures -= 1;
                anyhow::bail!("disk unavailable");
            }
            self.inner.end_chunk(end)
        }

        fn delete_since(&mut self, block: u64) -> Result<()> {
            self.inner.delete_since(block)
        }
    }

    #[test]
    fn test_commit_retries_once() {
        let mut state = FlakyState { inner: MemoryState::new(), failures: 1, attempts: 0 };
        commit_with_retry(&mut state, 9).unwrap();
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_scanned_block().unwrap(), Some(9));

        let mut state = FlakyState { inner: MemoryState::new(), failures: 2, attempts: 0 };
        assert!(commit_with_retry(&mut state, 9).is_err());
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_scanned_block().unwrap(), None);
    }
}
