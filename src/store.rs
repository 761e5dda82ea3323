//! RocksDB persistence
//!
//! - `RocksScanState`: durable `ScanState` for decoded calls and events
//! - `RocksBlockIndex`: secondary block index consulted by the hybrid source

use crate::keys::{
    block_prefix, decode_block_number, encode_block_key, encode_call_key, encode_event_key,
    encode_meta_key, encode_transaction_key, META_LAST_SCANNED,
};
use crate::records::{CrawlRecord, DecodedCall, DecodedEvent, IndexedBlock, IndexedTransaction};
use crate::source::BlockIndex;
use crate::state::ScanState;
use crate::types::Block;
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use std::path::Path;

fn open_with_column_families<P: AsRef<Path>>(path: P, names: &[&str]) -> Result<DB> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let column_families = names
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
        .collect::<Vec<_>>();

    DB::open_cf_descriptors(&opts, path, column_families).context("Failed to open RocksDB database")
}

/// Get a column family handle by name.
fn get_cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .with_context(|| format!("Column family '{}' not found", name))
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Expected 8 bytes (u64), got {}", bytes.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Keys of `cf` whose block number is at least `block`.
fn keys_from_block(db: &DB, cf: &rocksdb::ColumnFamily, prefix: u8, block: u64) -> Result<Vec<Box<[u8]>>> {
    let start = block_prefix(prefix, block);
    let mut keys = Vec::new();
    for item in db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward)) {
        let (key, _) = item.context("Failed to read iterator")?;
        if key.first() != Some(&prefix) {
            break;
        }
        keys.push(key);
    }
    Ok(keys)
}

/// JSON values of `cf` with block numbers in `[start, end]`.
fn values_in_range<T: DeserializeOwned>(
    db: &DB,
    cf: &rocksdb::ColumnFamily,
    prefix: u8,
    start: u64,
    end: u64,
) -> Result<Vec<T>> {
    let start_key = block_prefix(prefix, start);
    let mut values = Vec::new();
    for item in db.iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward)) {
        let (key, value) = item.context("Failed to read iterator")?;
        if key.first() != Some(&prefix) {
            break;
        }
        match decode_block_number(&key) {
            Some(block) if block <= end => {}
            _ => break,
        }
        values.push(serde_json::from_slice(&value).context("Failed to deserialize record")?);
    }
    Ok(values)
}

/// RocksDB-backed implementation of ScanState.
///
/// Uses column families to organize different types of data:
/// - calls: decoded function calls (JSON)
/// - events: decoded events (JSON)
/// - meta: metadata (last scanned block)
pub struct RocksScanState {
    db: DB,
    pending: Vec<CrawlRecord>,
}

impl RocksScanState {
    /// Open or create a scan state database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_with_column_families(path, &["calls", "events", "meta"])?;
        Ok(Self {
            db,
            pending: Vec::new(),
        })
    }

    /// Committed calls with block numbers in `[start, end]`.
    pub fn calls_in_range(&self, start: u64, end: u64) -> Result<Vec<DecodedCall>> {
        let cf = get_cf(&self.db, "calls")?;
        values_in_range(&self.db, cf, b'F', start, end)
    }

    /// Committed events with block numbers in `[start, end]`.
    pub fn events_in_range(&self, start: u64, end: u64) -> Result<Vec<DecodedEvent>> {
        let cf = get_cf(&self.db, "events")?;
        values_in_range(&self.db, cf, b'E', start, end)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl ScanState for RocksScanState {
    fn last_scanned_block(&self) -> Result<Option<u64>> {
        let cf = get_cf(&self.db, "meta")?;
        let key = encode_meta_key(META_LAST_SCANNED);
        match self
            .db
            .get_cf(cf, &key)
            .context("Failed to get last scanned block")?
        {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
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
        let calls_cf = get_cf(&self.db, "calls")?;
        let events_cf = get_cf(&self.db, "events")?;
        let meta_cf = get_cf(&self.db, "meta")?;

        let mut batch = WriteBatch::default();
        for record in &self.pending {
            match record {
                CrawlRecord::Call(call) => {
                    let key = encode_call_key(call.block_number, call.transaction_hash);
                    let value = serde_json::to_vec(call).context("Failed to serialize call")?;
                    batch.put_cf(calls_cf, key, value);
                }
                CrawlRecord::Event(event) => {
                    let key = encode_event_key(
                        event.block_number,
                        event.transaction_hash,
                        event.log_index,
                    );
                    let value = serde_json::to_vec(event).context("Failed to serialize event")?;
                    batch.put_cf(events_cf, key, value);
                }
            }
        }

        let head = match self.last_scanned_block()? {
            Some(last) => last.max(end),
            None => end,
        };
        batch.put_cf(meta_cf, encode_meta_key(META_LAST_SCANNED), head.to_be_bytes());

        self.db.write(batch).context("Failed to commit chunk")?;
        self.pending.clear();
        Ok(())
    }

    fn abort_chunk(&mut self) {
        self.pending.clear();
    }

    fn delete_since(&mut self, block: u64) -> Result<()> {
        let calls_cf = get_cf(&self.db, "calls")?;
        let events_cf = get_cf(&self.db, "events")?;
        let meta_cf = get_cf(&self.db, "meta")?;

        let mut batch = WriteBatch::default();
        let call_keys = keys_from_block(&self.db, calls_cf, b'F', block)?;
        let event_keys = keys_from_block(&self.db, events_cf, b'E', block)?;
        for key in &call_keys {
            batch.delete_cf(calls_cf, key);
        }
        for key in &event_keys {
            batch.delete_cf(events_cf, key);
        }

        let meta_key = encode_meta_key(META_LAST_SCANNED);
        match self.last_scanned_block()? {
            Some(last) if last >= block => match block.checked_sub(1) {
                Some(previous) => batch.put_cf(meta_cf, &meta_key, previous.to_be_bytes()),
                None => batch.delete_cf(meta_cf, &meta_key),
            },
            _ => {}
        }

        self.db.write(batch).context("Failed to delete records")?;
        self.pending.retain(|record| record.block_number() < block);

        tracing::info!(
            since = block,
            calls = call_keys.len(),
            events = event_keys.len(),
            "Deleted records"
        );
        Ok(())
    }
}

/// RocksDB-backed secondary block index.
///
/// Column families:
/// - blocks: block headers with their on-chain transaction count (postcard)
/// - transactions: transactions keyed by (block, index) (postcard)
pub struct RocksBlockIndex {
    db: DB,
}

impl RocksBlockIndex {
    /// Open or create a block index database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_with_column_families(path, &["blocks", "transactions"])?;
        Ok(Self { db })
    }

    /// Store a block header and all of its transactions in one write.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let blocks_cf = get_cf(&self.db, "blocks")?;
        let txs_cf = get_cf(&self.db, "transactions")?;

        let mut batch = WriteBatch::default();
        let header = IndexedBlock::from_block(block);
        let value = postcard::to_allocvec(&header).context("Failed to serialize block header")?;
        batch.put_cf(blocks_cf, encode_block_key(block.number), value);

        for (position, tx) in block.transactions.iter().enumerate() {
            let row = IndexedTransaction::from_transaction(tx, position as u64);
            let value = postcard::to_allocvec(&row).context("Failed to serialize transaction")?;
            batch.put_cf(
                txs_cf,
                encode_transaction_key(block.number, row.transaction_index),
                value,
            );
        }

        self.db.write(batch).context("Failed to put block")?;
        Ok(())
    }

    /// Store a block header only.
    pub fn put_header(&self, header: &IndexedBlock) -> Result<()> {
        let cf = get_cf(&self.db, "blocks")?;
        let value = postcard::to_allocvec(header).context("Failed to serialize block header")?;
        self.db
            .put_cf(cf, encode_block_key(header.number), value)
            .context("Failed to put block header")?;
        Ok(())
    }

    /// Store a single transaction row.
    pub fn put_transaction(&self, block: u64, tx: &IndexedTransaction) -> Result<()> {
        let cf = get_cf(&self.db, "transactions")?;
        let value = postcard::to_allocvec(tx).context("Failed to serialize transaction")?;
        self.db
            .put_cf(cf, encode_transaction_key(block, tx.transaction_index), value)
            .context("Failed to put transaction")?;
        Ok(())
    }
}

impl BlockIndex for RocksBlockIndex {
    fn block_header(&self, number: u64) -> Result<Option<IndexedBlock>> {
        let cf = get_cf(&self.db, "blocks")?;
        match self
            .db
            .get_cf(cf, encode_block_key(number))
            .context("Failed to get block header")?
        {
            Some(bytes) => {
                let header =
                    postcard::from_bytes(&bytes).context("Failed to deserialize block header")?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    fn block_transactions(&self, number: u64) -> Result<Vec<IndexedTransaction>> {
        let cf = get_cf(&self.db, "transactions")?;
        let prefix = block_prefix(b'T', number);
        let mut transactions = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx: IndexedTransaction =
                postcard::from_bytes(&value).context("Failed to deserialize transaction")?;
            transactions.push(tx);
        }
        Ok(transactions)
    }
}
