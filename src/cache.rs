//! Block cache
//!
//! Bounded in-memory cache of recently fetched blocks. The crawler asks
//! for the same block several times (transactions, then timestamps for
//! each decoded call), so keeping the last few around saves RPC calls.
//!
//! Strategy:
//! - Blocks are immutable once confirmed, so entries never go stale
//! - When the cache is full the least recently used block is evicted

use crate::types::Block;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of blocks kept by a data source.
pub const DEFAULT_BLOCK_CACHE_SIZE: usize = 50;

/// LRU cache of blocks keyed by block number.
pub struct BlockCache {
    /// Map of block number -> block
    blocks: HashMap<u64, Arc<Block>>,
    /// Usage order, least recently used at the front
    order: VecDeque<u64>,
    capacity: usize,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` blocks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Look up a block, marking it as recently used.
    pub fn get(&mut self, number: u64) -> Option<Arc<Block>> {
        let block = self.blocks.get(&number).cloned()?;
        self.touch(number);
        Some(block)
    }

    /// Insert a block, evicting the least recently used one if full.
    pub fn insert(&mut self, block: Arc<Block>) {
        let number = block.number;
        if self.blocks.insert(number, block).is_some() {
            self.touch(number);
            return;
        }
        self.order.push_back(number);
        while self.blocks.len() > self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    self.blocks.remove(&evicted);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn touch(&mut self, number: u64) {
        if let Some(pos) = self.order.iter().position(|n| *n == number) {
            self.order.remove(pos);
        }
        self.order.push_back(number);
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn block(number: u64) -> Arc<Block> {
        Arc::new(Block {
            number,
            hash: B256::with_last_byte(number as u8),
            timestamp: 1_000 + number,
            transactions: Vec::new(),
        })
    }

    #[test]
    fn test_cache_operations() {
        let mut cache = BlockCache::new(2);
        assert!(cache.get(1).is_none());

        cache.insert(block(1));
        cache.insert(block(2));
        assert_eq!(cache.get(1).map(|b| b.timestamp), Some(1_001));

        // 2 is now least recently used and gets evicted
        cache.insert(block(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let mut cache = BlockCache::new(2);
        cache.insert(block(1));
        cache.insert(block(1));
        assert_eq!(cache.len(), 1);
    }
}
