//! Scanner: walks block heights upward and hands each block to the indexer.
//!
//! Every wait (network call, retry backoff, not-yet-mined poll, channel send)
//! races the close signal, so a stop request never has to sit out the retry
//! budget.

use super::PipelineError;
use crate::rpc::{ChainClient, ClientError};
use crate::types::Block;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry and polling knobs for the fetch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Attempts per height before giving up (first try included)
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles on each further failure
    pub retry_base_delay: Duration,
    /// Bound on a single `block_by_height` call
    pub request_timeout: Duration,
    /// Wait before asking again for a height that is not mined yet
    pub poll_interval: Duration,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(12),
        }
    }
}

impl ScanPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.retry_base_delay.saturating_mul(factor)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts == 0 {
            return Err(PipelineError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(PipelineError::Config(
                "request_timeout must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelineError::Config(
                "poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
enum FetchError {
    Cancelled,
    Exhausted { attempts: u32, source: ClientError },
}

pub struct Scanner {
    client: Arc<dyn ChainClient>,
    policy: ScanPolicy,
    blocks: mpsc::Sender<Block>,
    errors: mpsc::UnboundedSender<PipelineError>,
    cancel_token: CancellationToken,
}

impl Scanner {
    pub fn new(
        client: Arc<dyn ChainClient>,
        policy: ScanPolicy,
        blocks: mpsc::Sender<Block>,
        errors: mpsc::UnboundedSender<PipelineError>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            client,
            policy,
            blocks,
            errors,
            cancel_token,
        }
    }

    /// Fetch heights `start, start+1, ...` until cancelled or a height
    /// exhausts its retries. Dropping `self` closes the hand-off channel,
    /// which is how the indexer learns the scanner is gone.
    pub async fn run(self, start: u64) {
        info!(start, "🔍 Scanner started");
        let mut height = start;

        loop {
            let block = match self.fetch_block(height).await {
                Ok(block) => block,
                Err(FetchError::Cancelled) => break,
                Err(FetchError::Exhausted { attempts, source }) => {
                    error!(height, attempts, error = %source, "❌ Giving up on block");
                    let _ = self.errors.send(PipelineError::RetriesExhausted {
                        height,
                        attempts,
                        source,
                    });
                    break;
                }
            };

            debug!(height, txs = block.transactions.len(), "📦 Fetched block");

            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                sent = self.blocks.send(block) => {
                    if sent.is_err() {
                        warn!(height, "Indexer gone, scanner exiting");
                        break;
                    }
                }
            }

            height = height.saturating_add(1);
        }

        info!(next_height = height, "Scanner stopped");
    }

    async fn fetch_block(&self, height: u64) -> Result<Block, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return Err(FetchError::Cancelled),
                res = tokio::time::timeout(
                    self.policy.request_timeout,
                    self.client.block_by_height(height, true),
                ) => res.unwrap_or_else(|_| Err(ClientError::Timeout(self.policy.request_timeout))),
            };

            match outcome {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => {
                    debug!(
                        height,
                        wait = ?self.policy.poll_interval,
                        "⏳ Block not mined yet"
                    );
                    // The chain tip is not a failure; start a fresh retry budget
                    attempt = 0;
                    self.pause(self.policy.poll_interval).await?;
                }
                Err(source) if attempt >= self.policy.max_attempts => {
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        height,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        retry_in = ?delay,
                        error = %e,
                        "⚠️ Block fetch failed, retrying"
                    );
                    self.pause(delay).await?;
                }
            }
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), FetchError> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
