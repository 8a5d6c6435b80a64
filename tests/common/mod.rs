//! Scripted chain client shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use txwatch::pipeline::{Pipeline, ScanPolicy};
use txwatch::rpc::{ChainClient, ClientError};
use txwatch::{Block, SubscriptionRegistry, Transaction, TransactionIndex};

pub const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
pub const BOB: &str = "0xb0b0000000000000000000000000000000000002";
pub const CAROL: &str = "0xca201000000000000000000000000000000000c3";

/// What the fake node answers for one `block_by_height` call
#[derive(Debug, Clone)]
pub enum Step {
    Mined(Vec<Transaction>),
    Raw(Block),
    NotMined,
    Fail,
}

/// Answer used once a height's script is used up
#[derive(Debug, Clone, Copy)]
pub enum Fallback {
    NotMined,
    Fail,
    /// A block holding one ALICE -> BOB transfer
    Filler,
}

pub struct FakeChain {
    tip: Mutex<Option<u64>>,
    script: Mutex<HashMap<u64, VecDeque<Step>>>,
    fallback: Fallback,
    latency: Duration,
    tip_latency: Duration,
    blocking: Option<Duration>,
    calls: Mutex<Vec<(u64, Instant)>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            tip: Mutex::new(Some(0)),
            script: Mutex::new(HashMap::new()),
            fallback: Fallback::NotMined,
            latency: Duration::ZERO,
            tip_latency: Duration::ZERO,
            blocking: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tip(self, tip: Option<u64>) -> Self {
        *self.tip.lock() = tip;
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Every call awaits this long on the tokio clock
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `latest_height` awaits this long on the tokio clock
    pub fn with_tip_latency(mut self, latency: Duration) -> Self {
        self.tip_latency = latency;
        self
    }

    /// Every call parks its worker thread, ignoring cancellation
    pub fn with_blocking(mut self, duration: Duration) -> Self {
        self.blocking = Some(duration);
        self
    }

    pub fn script(self, height: u64, steps: Vec<Step>) -> Self {
        self.script.lock().insert(height, steps.into());
        self
    }

    pub fn set_tip(&self, tip: Option<u64>) {
        *self.tip.lock() = tip;
    }

    pub fn calls(&self) -> Vec<(u64, Instant)> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, height: u64) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(h, _)| *h == height)
            .map(|(_, at)| *at)
            .collect()
    }

    fn next_step(&self, height: u64) -> Step {
        let scripted = self
            .script
            .lock()
            .get_mut(&height)
            .and_then(|steps| steps.pop_front());
        scripted.unwrap_or(match self.fallback {
            Fallback::NotMined => Step::NotMined,
            Fallback::Fail => Step::Fail,
            Fallback::Filler => Step::Mined(vec![transfer(
                &format!("0xf{:x}", height),
                ALICE,
                BOB,
            )]),
        })
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        if !self.tip_latency.is_zero() {
            tokio::time::sleep(self.tip_latency).await;
        }
        let tip = *self.tip.lock();
        tip.ok_or(ClientError::Rpc {
            code: -32603,
            message: "tip unavailable".to_string(),
        })
    }

    async fn block_by_height(
        &self,
        height: u64,
        _include_transactions: bool,
    ) -> Result<Option<Block>, ClientError> {
        self.calls.lock().push((height, Instant::now()));

        if let Some(duration) = self.blocking {
            std::thread::sleep(duration);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_step(height) {
            Step::Mined(txs) => Ok(Some(Block::new(height, txs))),
            Step::Raw(block) => Ok(Some(block)),
            Step::NotMined => Ok(None),
            Step::Fail => Err(ClientError::Http {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        }
    }
}

pub fn transfer(hash: &str, from: &str, to: &str) -> Transaction {
    Transaction::new(hash, from, Some(to.to_string()))
}

pub fn fast_policy() -> ScanPolicy {
    ScanPolicy {
        max_attempts: 5,
        retry_base_delay: Duration::from_millis(100),
        request_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_secs(1),
    }
}

pub fn pipeline(chain: Arc<FakeChain>, policy: ScanPolicy) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        chain,
        Arc::new(TransactionIndex::new()),
        Arc::new(SubscriptionRegistry::new()),
        policy,
    ))
}

/// Poll `cond` on the tokio clock; panics after ~60s of (virtual) waiting
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..6_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub fn hashes(txs: &[Transaction]) -> Vec<&str> {
    txs.iter().map(|tx| tx.hash.as_str()).collect()
}
