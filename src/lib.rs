//! abiscan - ABI-driven contract call and event crawler
//!
//! Decodes function calls and events of watched contracts from an
//! Ethereum JSON-RPC node, persists them with resumable progress and
//! follows the chain head with a confirmation lag.

pub mod abi;
pub mod cache;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod crawler;
pub mod deployment;
pub mod fetcher;
pub mod keys;
pub mod records;
pub mod rpc;
pub mod scanner;
pub mod sink;
pub mod source;
pub mod state;
pub mod store;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod test_helpers;

// Re-export the main types for convenience
pub use abi::{AbiDecoder, AbiError, AbiValue, DecodeError};
pub use records::{CrawlRecord, DecodedCall, DecodedEvent};
pub use scanner::{EventScanner, ScannerConfig};
pub use source::{ChainDataSource, SourceError};
pub use state::{MemoryState, ScanState};
pub use store::{RocksBlockIndex, RocksScanState};
pub use watcher::{WatchConfig, WatchLoop};
