//! Record types for crawled contract data
//!
//! Decoded calls and events are what the scanners produce and what the
//! state store persists. Their argument maps are schemaless, so they are
//! stored as JSON. Secondary-index rows (blocks and transactions) have a
//! fixed shape and use postcard, which is compact and deterministic.

use crate::types::{Block, Transaction};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A top-level contract call decoded against the watched ABI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedCall {
    pub block_number: u64,
    /// Unix epoch seconds of the containing block
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub contract_address: Address,
    pub caller_address: Address,
    pub function_name: String,
    /// Decoded arguments by parameter name
    pub function_args: Map<String, Value>,
    pub gas_used: u64,
    /// Receipt status: 1 = success, 0 = failure
    pub status: u64,
}

/// An event log decoded against the watched ABI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    #[serde(rename = "event")]
    pub event_name: String,
    /// Decoded event fields by name, indexed and non-indexed alike
    pub args: Map<String, Value>,
    /// Contract that emitted the log
    pub address: Address,
    pub block_number: u64,
    /// Absent when the block was not visible yet or timestamps were skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<u64>,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// One line of the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CrawlRecord {
    Call(DecodedCall),
    Event(DecodedEvent),
}

impl CrawlRecord {
    pub fn block_number(&self) -> u64 {
        match self {
            CrawlRecord::Call(call) => call.block_number,
            CrawlRecord::Event(event) => event.block_number,
        }
    }
}

/// Block header row of the secondary block index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedBlock {
    pub number: u64,
    pub hash: B256,
    /// Unix epoch seconds
    pub timestamp: u64,
    /// Number of transactions the block has on chain. Used to detect
    /// blocks whose transactions were only partially ingested.
    pub transaction_count: u64,
}

impl IndexedBlock {
    pub fn from_block(block: &Block) -> Self {
        Self {
            number: block.number,
            hash: block.hash,
            timestamp: block.timestamp,
            transaction_count: block.transactions.len() as u64,
        }
    }

    /// Rebuild a full block from this header and its indexed transactions.
    pub fn into_block(self, transactions: Vec<IndexedTransaction>) -> Block {
        let number = self.number;
        Block {
            number,
            hash: self.hash,
            timestamp: self.timestamp,
            transactions: transactions
                .into_iter()
                .map(|tx| tx.into_transaction(number))
                .collect(),
        }
    }
}

/// Transaction row of the secondary block index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedTransaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Vec<u8>,
    pub transaction_index: u64,
}

impl IndexedTransaction {
    /// Build an index row. `position` is used when the node did not
    /// report a transaction index.
    pub fn from_transaction(tx: &Transaction, position: u64) -> Self {
        Self {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            input: tx.input.clone(),
            transaction_index: tx.transaction_index.unwrap_or(position),
        }
    }

    pub fn into_transaction(self, block_number: u64) -> Transaction {
        Transaction {
            hash: self.hash,
            from: self.from,
            to: self.to,
            value: self.value,
            input: self.input,
            block_number: Some(block_number),
            transaction_index: Some(self.transaction_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> DecodedEvent {
        let mut args = Map::new();
        args.insert("value".to_string(), json!(5));
        DecodedEvent {
            event_name: "Transfer".to_string(),
            args,
            address: Address::repeat_byte(0x11),
            block_number: 7,
            block_timestamp: None,
            transaction_hash: B256::repeat_byte(0x22),
            log_index: 3,
        }
    }

    #[test]
    fn test_record_is_tagged_by_type() {
        let record = CrawlRecord::Event(sample_event());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "Transfer");
        assert_eq!(value["log_index"], 3);
        // Skipped timestamps are omitted rather than written as null
        assert!(value.get("block_timestamp").is_none());

        let parsed: CrawlRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.block_number(), 7);
    }

    #[test]
    fn test_indexed_block_rebuilds_transactions() {
        let header = IndexedBlock {
            number: 42,
            hash: B256::repeat_byte(0x01),
            timestamp: 1_700_000_000,
            transaction_count: 1,
        };
        let tx = IndexedTransaction {
            hash: B256::repeat_byte(0x02),
            from: Address::repeat_byte(0x03),
            to: Some(Address::repeat_byte(0x04)),
            value: U256::from(9u64),
            input: vec![0xde, 0xad],
            transaction_index: 0,
        };

        let encoded = postcard::to_allocvec(&header).unwrap();
        let decoded: IndexedBlock = postcard::from_bytes(&encoded).unwrap();
        let block = decoded.into_block(vec![tx]);
        assert_eq!(block.number, 42);
        assert_eq!(block.transactions[0].block_number, Some(42));
        assert_eq!(block.transactions[0].to, Some(Address::repeat_byte(0x04)));
    }
}
