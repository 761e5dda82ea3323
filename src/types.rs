//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks, transactions, receipts and logs
//! returned from Ethereum JSON-RPC endpoints.

use alloy_primitives::{Address, FixedBytes, B256, U256};
use serde::{Deserialize, Deserializer};

/// Block fetched with full transaction bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Unix seconds
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,

    /// List of transactions in the block, in on-chain order
    #[serde(rename = "transactions", default)]
    pub transactions: Vec<Transaction>,
}

/// Ethereum transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transaction {
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// None for contract creation
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Wei
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Call data, empty for plain transfers
    #[serde(rename = "input", deserialize_with = "deserialize_hex_bytes")]
    pub input: Vec<u8>,

    /// Block the transaction was mined in (null while pending)
    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub block_number: Option<u64>,

    /// Position of the transaction within its block (null while pending)
    #[serde(rename = "transactionIndex", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub transaction_index: Option<u64>,
}

impl Transaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// Contract log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Log {
    /// Address of the contract that emitted the log
    #[serde(rename = "address", deserialize_with = "deserialize_hex_address")]
    pub address: Address,

    /// topic0 is the event signature hash, the rest are indexed params
    #[serde(rename = "topics", default, deserialize_with = "deserialize_hex_b256_vec")]
    pub topics: Vec<B256>,

    #[serde(rename = "data", deserialize_with = "deserialize_hex_bytes")]
    pub data: Vec<u8>,

    /// Block containing the log (null for pending logs)
    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub block_number: Option<u64>,

    /// Hash of the emitting transaction (null for pending logs)
    #[serde(rename = "transactionHash", default, deserialize_with = "deserialize_hex_b256_opt")]
    pub transaction_hash: Option<B256>,

    /// Position of the log within its block (null for pending logs)
    #[serde(rename = "logIndex", default, deserialize_with = "deserialize_hex_u64_opt")]
    pub log_index: Option<u64>,

    /// True when the log was removed by a chain reorganisation
    #[serde(rename = "removed", default)]
    pub removed: bool,
}

/// Transaction receipt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to
    #[serde(rename = "transactionHash", deserialize_with = "deserialize_hex_b256")]
    pub transaction_hash: B256,

    /// 1 on success, 0 on revert
    #[serde(rename = "status", deserialize_with = "deserialize_hex_u64")]
    pub status: u64,

    #[serde(rename = "gasUsed", deserialize_with = "deserialize_hex_u64")]
    pub gas_used: u64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

// Hex deserialization helpers

/// Decode a `0x`-prefixed hex string, tolerating odd digit counts
/// (some nodes drop the leading zero of quantities).
fn hex_bytes<E: serde::de::Error>(s: &str) -> Result<Vec<u8>, E> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits)).map_err(E::custom)
    } else {
        hex::decode(digits).map_err(E::custom)
    }
}

fn fixed_bytes<const N: usize, E: serde::de::Error>(s: &str) -> Result<FixedBytes<N>, E> {
    let bytes = hex_bytes::<E>(s)?;
    if bytes.len() != N {
        return Err(E::custom(format!("expected {} bytes, got {}", N, bytes.len())));
    }
    Ok(FixedBytes::from_slice(&bytes))
}

/// Parse a hex quantity ("0x1a") into a u64.
pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16)
}

fn deserialize_hex_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    parse_hex_u64(&String::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u64_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|s| parse_hex_u64(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn deserialize_hex_u256<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let bytes = hex_bytes::<D::Error>(&String::deserialize(deserializer)?)?;
    if bytes.len() > 32 {
        return Err(serde::de::Error::custom("quantity wider than 256 bits"));
    }
    Ok(U256::from_be_slice(&bytes))
}

fn deserialize_hex_b256<'de, D: Deserializer<'de>>(deserializer: D) -> Result<B256, D::Error> {
    fixed_bytes(&String::deserialize(deserializer)?)
}

fn deserialize_hex_b256_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<B256>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|s| fixed_bytes(&s))
        .transpose()
}

fn deserialize_hex_b256_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<B256>, D::Error> {
    Vec::<String>::deserialize(deserializer)?
        .iter()
        .map(|s| fixed_bytes(s))
        .collect()
}

fn deserialize_hex_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
    fixed_bytes::<20, D::Error>(&String::deserialize(deserializer)?).map(Address::from)
}

/// Missing, null and "0x" all mean no recipient.
fn deserialize_hex_address_opt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Address>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.trim_start_matches("0x").is_empty() => {
            fixed_bytes::<20, D::Error>(&s).map(|bytes| Some(Address::from(bytes)))
        }
        _ => Ok(None),
    }
}

fn deserialize_hex_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    hex_bytes(&String::deserialize(deserializer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};
    use serde_json::json;

    #[test]
    fn test_deserialize_block_with_transactions() {
        let raw = json!({
            "number": "0x10",
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "timestamp": "0x5f5e100",
            "transactions": [{
                "hash": "0x2222222222222222222222222222222222222222222222222222222222222222",
                "from": "0x0742d35cc6634c0532925a3b844bc9e7595f0beb",
                "to": null,
                "value": "0x0",
                "input": "0x60806040",
                "blockNumber": "0x10",
                "transactionIndex": "0x0"
            }]
        });

        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.number, 16);
        assert_eq!(block.timestamp, 100_000_000);
        assert_eq!(block.transactions.len(), 1);
        let tx = &block.transactions[0];
        assert!(tx.is_contract_creation());
        assert_eq!(tx.input, vec![0x60, 0x80, 0x60, 0x40]);
        assert_eq!(tx.block_number, Some(16));
    }

    #[test]
    fn test_deserialize_log() {
        let raw = json!({
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
            ],
            "data": "0x",
            "blockNumber": "0x1",
            "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "logIndex": "0x2"
        });

        let log: Log = serde_json::from_value(raw).unwrap();
        assert_eq!(log.address, address!("dac17f958d2ee523a2206206994597c13d831ec7"));
        assert_eq!(
            log.topics,
            vec![b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")]
        );
        assert!(log.data.is_empty());
        assert_eq!(log.log_index, Some(2));
        assert!(!log.removed);
    }

    #[test]
    fn test_pending_log_fields_are_optional() {
        let raw = json!({
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "topics": [],
            "data": "0x00",
            "blockNumber": null,
            "transactionHash": null,
            "logIndex": null
        });

        let log: Log = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number, None);
        assert_eq!(log.transaction_hash, None);
        assert_eq!(log.log_index, None);
    }

    #[test]
    fn test_deserialize_receipt() {
        let raw = json!({
            "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "status": "0x1",
            "gasUsed": "0x5208"
        });

        let receipt: Receipt = serde_json::from_value(raw).unwrap();
        assert!(receipt.is_success());
        assert_eq!(receipt.gas_used, 21000);
    }
}
