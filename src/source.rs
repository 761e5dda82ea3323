//! Chain data sources
//!
//! `ChainDataSource` is the read-only view of the chain used by the
//! crawler and the event scanner. Two implementations exist:
//! - `RpcDataSource`: talks to a JSON-RPC node, with a bounded block cache
//! - `HybridDataSource`: serves blocks from a secondary block index when it
//!   has them completely, and falls back to a primary source otherwise

use crate::cache::{BlockCache, DEFAULT_BLOCK_CACHE_SIZE};
use crate::records::{IndexedBlock, IndexedTransaction};
use crate::rpc::RpcClient;
use crate::types::{Block, Log, Receipt, Transaction};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by a chain data source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The block is not visible yet. Callers treat this as "nothing to do yet".
    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("receipt for transaction {0} not found")]
    ReceiptNotFound(B256),

    /// Transport, RPC or deserialization failure.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::BlockNotFound(_))
    }
}

/// Read access to a blockchain.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Number of the current chain head.
    async fn last_block_number(&self) -> Result<u64, SourceError>;

    /// Block with full transaction bodies.
    async fn block(&self, number: u64) -> Result<Arc<Block>, SourceError>;

    /// Receipt of a mined transaction.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, SourceError>;

    /// Logs in `[from, to]` whose topic0 is one of `signatures`, emitted by
    /// one of `addresses` (any address when empty).
    async fn logs(
        &self,
        signatures: &[B256],
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<Log>, SourceError>;

    async fn block_timestamp(&self, number: u64) -> Result<u64, SourceError> {
        Ok(self.block(number).await?.timestamp)
    }

    /// Transactions of a block whose recipient is `address`, in block order.
    async fn transactions_to(
        &self,
        address: Address,
        number: u64,
    ) -> Result<Vec<Transaction>, SourceError> {
        let block = self.block(number).await?;
        Ok(block
            .transactions
            .iter()
            .filter(|tx| tx.to == Some(address))
            .cloned()
            .collect())
    }
}

/// Data source backed by a JSON-RPC node.
pub struct RpcDataSource {
    client: RpcClient,
    blocks: Mutex<BlockCache>,
}

impl RpcDataSource {
    pub fn new(client: RpcClient) -> Self {
        Self::with_cache_size(client, DEFAULT_BLOCK_CACHE_SIZE)
    }

    pub fn with_cache_size(client: RpcClient, cache_size: usize) -> Self {
        Self {
            client,
            blocks: Mutex::new(BlockCache::new(cache_size)),
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    fn cached(&self, number: u64) -> Option<Arc<Block>> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(number)
    }
}

#[async_trait]
impl ChainDataSource for RpcDataSource {
    async fn last_block_number(&self) -> Result<u64, SourceError> {
        Ok(self.client.get_block_number().await?)
    }

    async fn block(&self, number: u64) -> Result<Arc<Block>, SourceError> {
        if let Some(block) = self.cached(number) {
            return Ok(block);
        }

        let block = self
            .client
            .get_block_by_number(number, true)
            .await?
            .ok_or(SourceError::BlockNotFound(number))?;
        let block = Arc::new(block);
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block.clone());
        Ok(block)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, SourceError> {
        self.client
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or(SourceError::ReceiptNotFound(tx_hash))
    }

    async fn logs(
        &self,
        signatures: &[B256],
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<Log>, SourceError> {
        Ok(self.client.get_logs(signatures, from, to, addresses).await?)
    }
}

/// Secondary store of previously ingested blocks.
pub trait BlockIndex: Send + Sync {
    /// Header of an indexed block, if the block was ingested.
    fn block_header(&self, number: u64) -> anyhow::Result<Option<IndexedBlock>>;

    /// Indexed transactions of a block, in transaction index order.
    fn block_transactions(&self, number: u64) -> anyhow::Result<Vec<IndexedTransaction>>;
}

impl<T: BlockIndex + ?Sized> BlockIndex for Arc<T> {
    fn block_header(&self, number: u64) -> anyhow::Result<Option<IndexedBlock>> {
        (**self).block_header(number)
    }

    fn block_transactions(&self, number: u64) -> anyhow::Result<Vec<IndexedTransaction>> {
        (**self).block_transactions(number)
    }
}

/// Counters describing how a hybrid source served its blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HybridStats {
    /// Blocks served entirely from the index
    pub index_hits: u64,
    /// Blocks present in the index with only part of their transactions
    pub partial_misses: u64,
    /// Blocks fetched from the primary source
    pub fallbacks: u64,
}

#[derive(Default)]
struct HybridCounters {
    index_hits: AtomicU64,
    partial_misses: AtomicU64,
    fallbacks: AtomicU64,
}

/// Data source that prefers a block index and falls back to a primary source.
///
/// A block whose indexed transaction count does not match its header is a
/// miss: it is fetched from the primary source as a whole and the indexed
/// rows are ignored.
pub struct HybridDataSource<P, I> {
    primary: P,
    index: I,
    counters: HybridCounters,
}

impl<P: ChainDataSource, I: BlockIndex> HybridDataSource<P, I> {
    pub fn new(primary: P, index: I) -> Self {
        Self {
            primary,
            index,
            counters: HybridCounters::default(),
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn stats(&self) -> HybridStats {
        HybridStats {
            index_hits: self.counters.index_hits.load(Ordering::Relaxed),
            partial_misses: self.counters.partial_misses.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Complete block from the index, or None on any kind of miss.
    fn indexed_block(&self, number: u64) -> anyhow::Result<Option<Block>> {
        let Some(header) = self.index.block_header(number)? else {
            return Ok(None);
        };
        let transactions = self.index.block_transactions(number)?;
        if transactions.len() as u64 != header.transaction_count {
            self.counters.partial_misses.fetch_add(1, Ordering::Relaxed);
            debug!(
                block = number,
                indexed = transactions.len(),
                expected = header.transaction_count,
                "Partially indexed block, falling back to primary source"
            );
            return Ok(None);
        }
        Ok(Some(header.into_block(transactions)))
    }
}

#[async_trait]
impl<P: ChainDataSource, I: BlockIndex> ChainDataSource for HybridDataSource<P, I> {
    async fn last_block_number(&self) -> Result<u64, SourceError> {
        self.primary.last_block_number().await
    }

    async fn block(&self, number: u64) -> Result<Arc<Block>, SourceError> {
        match self.indexed_block(number) {
            Ok(Some(block)) => {
                self.counters.index_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::new(block));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(block = number, error = %e, "Block index lookup failed");
            }
        }

        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.primary.block(number).await
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, SourceError> {
        self.primary.transaction_receipt(tx_hash).await
    }

    async fn logs(
        &self,
        signatures: &[B256],
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<Log>, SourceError> {
        self.primary.logs(signatures, from, to, addresses).await
    }
}
