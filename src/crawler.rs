//! Function call crawling
//!
//! Walks every block of a range, lists the transactions sent to each
//! watched contract and decodes their call data. This costs one block
//! lookup per block even when nothing matches, so it is only used when
//! call-level data is needed on top of events.

use crate::abi::{warn_on_decode_failure, AbiDecoder, DecodeErrorHandler, DecodeFailure};
use crate::records::DecodedCall;
use crate::scanner::CrawlError;
use crate::source::ChainDataSource;
use crate::state::ScanState;
use alloy_primitives::Address;
use std::sync::Arc;
use tracing::debug;

/// Result of crawling a block range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    /// Calls registered with the state, in block and transaction order
    pub calls: Vec<DecodedCall>,
    pub decode_errors: usize,
}

pub struct FunctionCallCrawler {
    decoder: Arc<AbiDecoder>,
    addresses: Vec<Address>,
    on_decode_error: DecodeErrorHandler,
}

impl FunctionCallCrawler {
    pub fn new(decoder: Arc<AbiDecoder>, addresses: Vec<Address>) -> Self {
        Self {
            decoder,
            addresses,
            on_decode_error: warn_on_decode_failure(),
        }
    }

    /// Replace the handler invoked for undecodable transactions.
    pub fn with_decode_error_handler(mut self, handler: DecodeErrorHandler) -> Self {
        self.on_decode_error = handler;
        self
    }

    /// Decode calls to the watched contracts in `[from, to]` and register
    /// them with `state`.
    ///
    /// Registered calls are not committed: the caller commits them with
    /// the rest of the chunk. A transaction that fails to decode is
    /// reported and skipped.
    pub async fn crawl<C, S>(
        &self,
        source: &C,
        state: &mut S,
        from: u64,
        to: u64,
    ) -> Result<CrawlReport, CrawlError>
    where
        C: ChainDataSource + ?Sized,
        S: ScanState + ?Sized,
    {
        let mut report = CrawlReport::default();
        for block in from..=to {
            let mut timestamp = None;
            for &contract in &self.addresses {
                let transactions = source.transactions_to(contract, block).await?;
                for tx in transactions {
                    let decoded = match self.decoder.decode_function_call(&tx.input) {
                        Ok(decoded) => decoded,
                        Err(error) => {
                            report.decode_errors += 1;
                            (self.on_decode_error)(&DecodeFailure {
                                block_number: Some(block),
                                transaction_hash: Some(tx.hash),
                                log_index: None,
                                error,
                            });
                            continue;
                        }
                    };

                    let receipt = source.transaction_receipt(tx.hash).await?;
                    let block_timestamp = match timestamp {
                        Some(ts) => ts,
                        None => {
                            let ts = source.block_timestamp(block).await?;
                            timestamp = Some(ts);
                            ts
                        }
                    };

                    let call = DecodedCall {
                        block_number: block,
                        block_timestamp,
                        transaction_hash: tx.hash,
                        contract_address: contract,
                        caller_address: tx.from,
                        function_name: decoded.name.clone(),
                        function_args: decoded.args_json(),
                        gas_used: receipt.gas_used,
                        status: receipt.status,
                    };
                    state
                        .register_call(call.clone())
                        .map_err(CrawlError::Persistence)?;
                    report.calls.push(call);
                }
            }
        }

        debug!(
            from_block = from,
            to_block = to,
            calls = report.calls.len(),
            decode_errors = report.decode_errors,
            "Crawled function calls"
        );
        Ok(report)
    }
}
