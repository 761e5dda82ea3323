//! Contract deployment discovery
//!
//! Finds the block a contract was deployed in by binary search over
//! `eth_getCode`, which is useful as a starting block for a full scan.

use crate::source::{ChainDataSource, RpcDataSource};
use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Access to historical contract code.
#[async_trait]
pub trait CodeProvider: Send + Sync {
    async fn head_block(&self) -> Result<u64>;

    /// Code stored at `address` as of `block` (empty when none).
    async fn code_at(&self, address: Address, block: u64) -> Result<Vec<u8>>;
}

#[async_trait]
impl CodeProvider for RpcDataSource {
    async fn head_block(&self) -> Result<u64> {
        Ok(self.last_block_number().await?)
    }

    async fn code_at(&self, address: Address, block: u64) -> Result<Vec<u8>> {
        self.client().get_code(address, block).await
    }
}

/// First block at which `address` has code, or None if it has none at the head.
///
/// `interval` throttles consecutive provider calls.
pub async fn find_deployment_block<P: CodeProvider + ?Sized>(
    provider: &P,
    address: Address,
    interval: Option<Duration>,
) -> Result<Option<u64>> {
    let head = provider.head_block().await?;
    if provider.code_at(address, head).await?.is_empty() {
        return Ok(None);
    }

    let mut low = 0;
    let mut high = head;
    while low < high {
        let mid = low + (high - low) / 2;
        if let Some(pause) = interval {
            tokio::time::sleep(pause).await;
        }
        if provider.code_at(address, mid).await?.is_empty() {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    tracing::info!(%address, block = low, "Found deployment block");
    Ok(Some(low))
}
