//! Range queries with retry-and-shrink
//!
//! Providers often fail oversized `eth_getLogs` queries with a timeout or a
//! generic error rather than a clean "range too large" response. The only
//! usable signal is the failure itself, so each retry halves the requested
//! range and the caller learns how far the query actually reached.

use crate::source::SourceError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Retry budget for a single range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_retries: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 30,
            delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Query for blocks {start}-{end} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        start: u64,
        /// Last (smallest) end block that was tried
        end: u64,
        attempts: u32,
        #[source]
        source: SourceError,
    },
}

impl FetchError {
    /// The error returned by the last attempt.
    pub fn source_error(&self) -> &SourceError {
        match self {
            FetchError::RetriesExhausted { source, .. } => source,
        }
    }
}

/// Run `query(start, end)`, halving the range after every failure.
///
/// On failure the end block becomes `start + (end - start) / 2` and the next
/// attempt starts after `policy.delay`. Returns the end block actually
/// covered together with the query result. Fails after `policy.max_retries`
/// attempts (at least one) with the last error.
pub async fn fetch_with_shrink<T, F, Fut>(
    policy: &RetryPolicy,
    start: u64,
    mut end: u64,
    mut query: F,
) -> Result<(u64, T), FetchError>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 1;
    loop {
        match query(start, end).await {
            Ok(result) => return Ok((end, result)),
            Err(e) if attempt >= attempts => {
                return Err(FetchError::RetriesExhausted {
                    start,
                    end,
                    attempts,
                    source: e,
                });
            }
            Err(e) => {
                let shrunk = start + (end - start) / 2;
                warn!(
                    start_block = start,
                    end_block = end,
                    retry_end_block = shrunk,
                    attempt,
                    error = %e,
                    "Range query failed, shrinking and retrying"
                );
                end = shrunk;
                attempt += 1;
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}
