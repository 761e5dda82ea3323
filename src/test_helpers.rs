//! Test fixtures: an in-memory chain and encoders for calls and logs.

use crate::records::{DecodedCall, DecodedEvent};
use crate::source::{ChainDataSource, SourceError};
use crate::types::{Block, Log, Receipt, Transaction};
use crate::watcher::SourceConnector;
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Map};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockChain {
    head: u64,
    head_step: u64,
    /// Head returned by the last `last_block_number` call
    reported_head: u64,
    transactions: BTreeMap<u64, Vec<Transaction>>,
    receipts: HashMap<B256, Receipt>,
    logs: Vec<Log>,
    max_log_span: Option<u64>,
    fail_logs: bool,
    fail_heads: usize,
    fail_all: bool,
    block_requests: usize,
    /// (from, to, reported head) of every log query
    log_queries: Vec<(u64, u64, u64)>,
    /// (block, reported head) of every block lookup
    block_queries: Vec<(u64, u64)>,
}

/// Shared in-memory chain implementing `ChainDataSource`.
///
/// Blocks up to the head exist and are empty unless transactions were added.
#[derive(Clone, Default)]
pub struct MockSource {
    chain: Arc<Mutex<MockChain>>,
}

impl MockSource {
    pub fn new(head: u64) -> Self {
        let source = Self::default();
        {
            let mut chain = source.chain.lock().unwrap();
            chain.head = head;
            chain.reported_head = head;
        }
        source
    }

    /// Advance the head by `step` after each head lookup.
    pub fn set_head_step(&self, step: u64) {
        self.chain.lock().unwrap().head_step = step;
    }

    pub fn set_head(&self, head: u64) {
        self.chain.lock().unwrap().head = head;
    }

    /// Fail log queries spanning more than `span` blocks past `from`.
    pub fn set_max_log_range(&self, span: u64) {
        self.chain.lock().unwrap().max_log_span = Some(span);
    }

    pub fn fail_logs_always(&self) {
        self.chain.lock().unwrap().fail_logs = true;
    }

    /// Fail the next `count` head lookups.
    pub fn fail_next_heads(&self, count: usize) {
        self.chain.lock().unwrap().fail_heads = count;
    }

    /// Fail every request.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.chain.lock().unwrap().fail_all = unreachable;
    }

    pub fn add_transaction(&self, block: u64, mut tx: Transaction) {
        let mut chain = self.chain.lock().unwrap();
        let txs = chain.transactions.entry(block).or_default();
        tx.block_number = Some(block);
        tx.transaction_index = Some(txs.len() as u64);
        let receipt = Receipt {
            transaction_hash: tx.hash,
            status: 1,
            gas_used: 21_000 + txs.len() as u64,
        };
        txs.push(tx);
        chain.receipts.insert(receipt.transaction_hash, receipt);
    }

    pub fn add_log(&self, log: Log) {
        self.chain.lock().unwrap().logs.push(log);
    }

    pub fn timestamp_of(&self, block: u64) -> u64 {
        1_600_000_000 + block * 12
    }

    pub fn block_requests(&self) -> usize {
        self.chain.lock().unwrap().block_requests
    }

    pub fn log_queries(&self) -> Vec<(u64, u64, u64)> {
        self.chain.lock().unwrap().log_queries.clone()
    }

    pub fn block_queries(&self) -> Vec<(u64, u64)> {
        self.chain.lock().unwrap().block_queries.clone()
    }

    fn check_reachable(chain: &MockChain) -> Result<(), SourceError> {
        if chain.fail_all {
            return Err(SourceError::Provider(anyhow::anyhow!("connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainDataSource for MockSource {
    async fn last_block_number(&self) -> Result<u64, SourceError> {
        let mut chain = self.chain.lock().unwrap();
        Self::check_reachable(&chain)?;
        if chain.fail_heads > 0 {
            chain.fail_heads -= 1;
            return Err(SourceError::Provider(anyhow::anyhow!("head lookup failed")));
        }
        let head = chain.head;
        chain.reported_head = head;
        chain.head += chain.head_step;
        Ok(head)
    }

    async fn block(&self, number: u64) -> Result<Arc<Block>, SourceError> {
        let mut chain = self.chain.lock().unwrap();
        Self::check_reachable(&chain)?;
        chain.block_requests += 1;
        let reported = chain.reported_head;
        chain.block_queries.push((number, reported));
        if number > chain.head {
            return Err(SourceError::BlockNotFound(number));
        }
        Ok(Arc::new(Block {
            number,
            hash: B256::from(U256::from(number)),
            timestamp: self.timestamp_of(number),
            transactions: chain.transactions.get(&number).cloned().unwrap_or_default(),
        }))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Receipt, SourceError> {
        let chain = self.chain.lock().unwrap();
        Self::check_reachable(&chain)?;
        chain
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or(SourceError::ReceiptNotFound(tx_hash))
    }

    async fn logs(
        &self,
        signatures: &[B256],
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<Log>, SourceError> {
        let mut chain = self.chain.lock().unwrap();
        Self::check_reachable(&chain)?;
        let reported = chain.reported_head;
        chain.log_queries.push((from, to, reported));
        if chain.fail_logs {
            return Err(SourceError::Provider(anyhow::anyhow!("query timed out")));
        }
        if let Some(span) = chain.max_log_span {
            if to - from > span {
                return Err(SourceError::Provider(anyhow::anyhow!("response size exceeded")));
            }
        }
        Ok(chain
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                block >= from
                    && block <= to
                    && (addresses.is_empty() || addresses.contains(&log.address))
                    && log.topics.first().is_some_and(|t| signatures.contains(t))
            })
            .cloned()
            .collect())
    }
}

/// Connector handing out a shared `MockSource`, failing a set number of times.
pub struct MockConnector {
    pub source: MockSource,
    pub failures: AtomicUsize,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(source: MockSource) -> Self {
        Self {
            source,
            failures: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SourceConnector for MockConnector {
    type Source = MockSource;

    async fn connect(&self, _endpoint: &str) -> anyhow::Result<MockSource> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("connection refused");
        }
        Ok(self.source.clone())
    }
}

/// Transaction with hash `repeat_byte(n)` sent to `to`.
pub fn tx_to(n: u8, to: Address, input: Vec<u8>) -> Transaction {
    Transaction {
        hash: B256::repeat_byte(n),
        from: Address::repeat_byte(0xf0),
        to: Some(to),
        value: U256::ZERO,
        input,
        block_number: None,
        transaction_index: None,
    }
}

/// ABI-encode a call to `signature` with `args`.
pub fn encode_call(signature: &str, args: Vec<DynSolValue>) -> Vec<u8> {
    let mut input = keccak256(signature)[..4].to_vec();
    input.extend(DynSolValue::Tuple(args).abi_encode_params());
    input
}

pub fn mint_input(account: Address, amount: u64) -> Vec<u8> {
    encode_call(
        "mint(address,uint256)",
        vec![
            DynSolValue::Address(account),
            DynSolValue::Uint(U256::from(amount), 256),
        ],
    )
}

/// Transaction hash used for logs at (block, log index).
pub fn log_tx_hash(block: u64, log_index: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&block.to_be_bytes());
    bytes[8..16].copy_from_slice(&log_index.to_be_bytes());
    B256::from(bytes)
}

pub fn mined_log(
    address: Address,
    topics: Vec<B256>,
    data: Vec<u8>,
    block: u64,
    log_index: u64,
) -> Log {
    Log {
        address,
        topics,
        data,
        block_number: Some(block),
        transaction_hash: Some(log_tx_hash(block, log_index)),
        log_index: Some(log_index),
        removed: false,
    }
}

/// ERC-20 `Transfer` log moving `value` between two fixed accounts.
pub fn transfer_log(contract: Address, block: u64, log_index: u64, value: u64) -> Log {
    mined_log(
        contract,
        vec![
            keccak256("Transfer(address,address,uint256)"),
            Address::repeat_byte(0x01).into_word(),
            Address::repeat_byte(0x02).into_word(),
        ],
        DynSolValue::Uint(U256::from(value), 256).abi_encode(),
        block,
        log_index,
    )
}

pub fn sample_call(block: u64, n: u8) -> DecodedCall {
    let mut args = Map::new();
    args.insert("amount".to_string(), json!(n));
    DecodedCall {
        block_number: block,
        block_timestamp: 1_600_000_000 + block * 12,
        transaction_hash: B256::repeat_byte(n),
        contract_address: Address::repeat_byte(0xcc),
        caller_address: Address::repeat_byte(0xf0),
        function_name: "mint".to_string(),
        function_args: args,
        gas_used: 21_000,
        status: 1,
    }
}

pub fn sample_event(block: u64, n: u8, log_index: u64) -> DecodedEvent {
    let mut args = Map::new();
    args.insert("value".to_string(), json!(n));
    DecodedEvent {
        event_name: "Transfer".to_string(),
        args,
        address: Address::repeat_byte(0xcc),
        block_number: block,
        block_timestamp: Some(1_600_000_000 + block * 12),
        transaction_hash: B256::repeat_byte(n),
        log_index,
    }
}
