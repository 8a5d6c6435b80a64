//! Block ingestion pipeline.
//!
//! ```text
//! ChainClient -> Scanner -> mpsc(1) -> Indexer -> TransactionIndex
//! ```
//!
//! The hand-off channel holds a single block, so the scanner is never more
//! than one block ahead of the indexer and heights are committed strictly in
//! order. Both tasks share one cancellation token and are tracked by the
//! pipeline's [`Lifecycle`].

pub mod indexer;
pub mod scanner;

pub use indexer::Indexer;
pub use scanner::{ScanPolicy, Scanner};

use crate::address::Address;
use crate::rpc::{ChainClient, ClientError};
use crate::shutdown::{Lifecycle, LifecycleState, ShutdownError, Stoppable};
use crate::subscriptions::SubscriptionRegistry;
use crate::tx_index::{IndexError, TransactionIndex};
use crate::types::{QuantityError, Transaction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the scanner -> indexer hand-off
const HANDOFF_CAPACITY: usize = 1;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline error receiver was already taken")]
    ErrorsTaken,

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("failed to resolve latest chain height: {0}")]
    LatestHeight(#[source] ClientError),

    #[error("giving up on block {height} after {attempts} attempts: {source}")]
    RetriesExhausted {
        height: u64,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("failed to commit block {block}: {source}")]
    Commit {
        block: String,
        #[source]
        source: IndexError,
    },

    #[error("block has invalid height {number:?}: {source}")]
    InvalidHeight {
        number: String,
        #[source]
        source: QuantityError,
    },
}

impl PipelineError {
    /// Whether the pipeline stopped making progress because of this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Commit { .. } | Self::InvalidHeight { .. })
    }
}

pub struct Pipeline {
    client: Arc<dyn ChainClient>,
    index: Arc<TransactionIndex>,
    registry: Arc<SubscriptionRegistry>,
    policy: ScanPolicy,
    current_height: Arc<AtomicU64>,
    lifecycle: Lifecycle,
    errors_tx: mpsc::UnboundedSender<PipelineError>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<PipelineError>>>,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn ChainClient>,
        index: Arc<TransactionIndex>,
        registry: Arc<SubscriptionRegistry>,
        policy: ScanPolicy,
    ) -> Self {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Self {
            client,
            index,
            registry,
            policy,
            current_height: Arc::new(AtomicU64::new(0)),
            lifecycle: Lifecycle::new("pipeline"),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        }
    }

    /// Launch the scanner and indexer and return the first height to scan.
    ///
    /// Without a beginning height the chain tip is resolved once, under the
    /// request timeout. Any failure here leaves the pipeline unstarted.
    pub async fn start(&self, beginning_height: Option<u64>) -> Result<u64, PipelineError> {
        self.policy.validate()?;
        if self.lifecycle.state() != LifecycleState::Idle {
            return Err(PipelineError::AlreadyStarted);
        }

        let start = match beginning_height {
            Some(height) => height,
            None => self.resolve_latest_height().await?,
        };

        if !self.lifecycle.begin() {
            return Err(PipelineError::AlreadyStarted);
        }

        let (blocks_tx, blocks_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let token = self.lifecycle.token();

        let scanner = Scanner::new(
            self.client.clone(),
            self.policy,
            blocks_tx,
            self.errors_tx.clone(),
            token.clone(),
        );
        let indexer = Indexer::new(
            self.index.clone(),
            self.registry.clone(),
            blocks_rx,
            self.current_height.clone(),
            self.errors_tx.clone(),
            token,
        );

        self.lifecycle.spawn(scanner.run(start));
        self.lifecycle.spawn(indexer.run());

        tracing::info!(start, "🚀 Ingestion pipeline started");
        Ok(start)
    }

    async fn resolve_latest_height(&self) -> Result<u64, PipelineError> {
        let timeout = self.policy.request_timeout;
        let height = tokio::time::timeout(timeout, self.client.latest_height())
            .await
            .unwrap_or_else(|_| Err(ClientError::Timeout(timeout)))
            .map_err(PipelineError::LatestHeight)?;
        tracing::info!(height, "📏 Starting from latest chain height");
        Ok(height)
    }

    /// Take the receiver for errors raised after `start`. Only the first
    /// caller gets it.
    pub fn errors(&self) -> Option<mpsc::UnboundedReceiver<PipelineError>> {
        self.errors_rx.lock().take()
    }

    /// Like [`Pipeline::errors`], but a second call is an error
    pub fn take_errors(&self) -> Result<mpsc::UnboundedReceiver<PipelineError>, PipelineError> {
        self.errors().ok_or(PipelineError::ErrorsTaken)
    }

    /// Returns true iff the address was not subscribed before
    pub fn subscribe(&self, address: &Address) -> bool {
        self.registry.subscribe(address)
    }

    /// Height of the last committed block, 0 before the first commit
    pub fn current_height(&self) -> u64 {
        self.current_height.load(Ordering::Acquire)
    }

    /// Transactions involving `address`, in the order they were indexed
    pub fn transactions_for(&self, address: &Address) -> Vec<Transaction> {
        self.index.query_by_address(address)
    }

    pub fn index(&self) -> &Arc<TransactionIndex> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

#[async_trait]
impl Stoppable for Pipeline {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    async fn stop(&self, deadline: Duration) -> Result<(), ShutdownError> {
        self.lifecycle.stop(deadline).await
    }
}
