//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints, plus the
//! endpoint rotation used when a connection has to be re-established.

use crate::types::{parse_hex_u64, Block, Log, Receipt};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Endpoint this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error from {}: {}", method, error);
        }

        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    /// Get the number of the most recent block.
    pub async fn get_block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let number = result
            .as_str()
            .context("Block number response is not a string")?;
        parse_hex_u64(number).context("Failed to parse block number")
    }

    /// Get a block by number.
    ///
    /// Returns `None` when the node does not know the block yet.
    pub async fn get_block_by_number(&self, number: u64, full_tx: bool) -> Result<Option<Block>> {
        let params = json!([format!("0x{:x}", number), full_tx]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .context("Failed to deserialize block")
    }

    /// Get a transaction receipt by hash.
    ///
    /// Returns `None` for unknown or still pending transactions.
    pub async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        let params = json!([format!("0x{:x}", tx_hash)]);
        let result = self.call("eth_getTransactionReceipt", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .context("Failed to deserialize receipt")
    }

    /// Query logs in the inclusive range `[from, to]`.
    ///
    /// `signatures` are OR-ed together as topic0, `addresses` restrict
    /// the emitting contracts (empty means any).
    pub async fn get_logs(
        &self,
        signatures: &[B256],
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<Log>> {
        let topic0: Vec<String> = signatures.iter().map(|s| format!("0x{:x}", s)).collect();
        let mut filter = json!({
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
            "topics": [topic0],
        });
        if !addresses.is_empty() {
            let addrs: Vec<String> = addresses.iter().map(|a| format!("0x{:x}", a)).collect();
            filter["address"] = json!(addrs);
        }

        let result = self.call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result).context("Failed to deserialize logs")
    }

    /// Get the code at an address at a specific block.
    ///
    /// Returns empty Vec for EOA addresses and not-yet-deployed contracts.
    pub async fn get_code(&self, address: Address, block: u64) -> Result<Vec<u8>> {
        let params = json!([format!("0x{:x}", address), format!("0x{:x}", block)]);
        let result = self.call("eth_getCode", params).await?;

        let code = result.as_str().context("Code response is not a string")?;
        hex::decode(code.strip_prefix("0x").unwrap_or(code)).context("Failed to decode code hex")
    }
}

/// Ordered list of RPC endpoints with a cursor.
///
/// Reconnection moves the cursor forward and wraps around, so a
/// single-endpoint rotation keeps retrying the same URL.
#[derive(Debug, Clone)]
pub struct EndpointRotation {
    endpoints: Vec<String>,
    index: usize,
}

impl EndpointRotation {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            anyhow::bail!("At least one RPC endpoint is required");
        }
        Ok(Self {
            endpoints,
            index: 0,
        })
    }

    pub fn current(&self) -> &str {
        &self.endpoints[self.index]
    }

    /// Move to the next endpoint and return it.
    pub fn advance(&mut self) -> &str {
        self.index = (self.index + 1) % self.endpoints.len();
        self.current()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_bad_url_lazily() {
        // reqwest only validates the URL when a request is sent
        let client = RpcClient::new("not a url", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(), "not a url");
    }

    #[test]
    fn test_rotation_wraps_around() {
        let mut rotation =
            EndpointRotation::new(vec!["http://a".to_string(), "http://b".to_string()]).unwrap();
        assert_eq!(rotation.current(), "http://a");
        assert_eq!(rotation.advance(), "http://b");
        assert_eq!(rotation.advance(), "http://a");
        assert_eq!(rotation.len(), 2);
    }

    #[test]
    fn test_rotation_requires_endpoint() {
        assert!(EndpointRotation::new(Vec::new()).is_err());
    }
}
