//! Indexer: filters each block down to subscribed transactions and commits them.

use super::PipelineError;
use crate::address::Address;
use crate::subscriptions::SubscriptionRegistry;
use crate::tx_index::TransactionIndex;
use crate::types::{parse_quantity, Block, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Indexer {
    index: Arc<TransactionIndex>,
    registry: Arc<SubscriptionRegistry>,
    blocks: mpsc::Receiver<Block>,
    current_height: Arc<AtomicU64>,
    errors: mpsc::UnboundedSender<PipelineError>,
    cancel_token: CancellationToken,
}

impl Indexer {
    pub fn new(
        index: Arc<TransactionIndex>,
        registry: Arc<SubscriptionRegistry>,
        blocks: mpsc::Receiver<Block>,
        current_height: Arc<AtomicU64>,
        errors: mpsc::UnboundedSender<PipelineError>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            index,
            registry,
            blocks,
            current_height,
            errors,
            cancel_token,
        }
    }

    /// Consume blocks until the close signal, or until the scanner has gone
    /// away and every block it handed over has been committed.
    pub async fn run(mut self) {
        info!("🗂️  Indexer started");

        loop {
            let block = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                next = self.blocks.recv() => match next {
                    Some(block) => block,
                    None => {
                        info!("Scanner terminated, no more blocks to index");
                        break;
                    }
                },
            };

            self.process(block);
        }

        info!(
            height = self.current_height.load(Ordering::Acquire),
            "Indexer stopped"
        );
    }

    /// Commit one block. Failures are reported and the block is skipped;
    /// the height still advances when it parses.
    ///
    /// The matched batch is committed all or nothing: one matched
    /// transaction with a malformed endpoint drops every other match in
    /// the block too.
    pub fn process(&self, block: Block) {
        let Block {
            number,
            transactions,
            ..
        } = block;
        let total = transactions.len();

        let matched: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| self.is_relevant(tx))
            .collect();
        let matched_count = matched.len();

        // Insert even when nothing matched so every block takes the same path
        match self.index.insert(matched) {
            Ok(inserted) => {
                if inserted > 0 {
                    info!(block = %number, inserted, total, "✅ Indexed transactions");
                }
            }
            Err(source) => {
                error!(block = %number, matched = matched_count, error = %source, "❌ Failed to commit block");
                let _ = self.errors.send(PipelineError::Commit {
                    block: number.clone(),
                    source,
                });
            }
        }

        match parse_quantity(&number) {
            Ok(height) => {
                self.current_height.fetch_max(height, Ordering::AcqRel);
                debug!(height, matched = matched_count, total, "Block committed");
            }
            Err(source) => {
                error!(block = %number, error = %source, "❌ Block has an unparseable height");
                let _ = self
                    .errors
                    .send(PipelineError::InvalidHeight { number, source });
            }
        }
    }

    fn is_relevant(&self, tx: &Transaction) -> bool {
        let from = match tx.from_address() {
            Ok(addr) => Some(addr),
            Err(e) => {
                debug!(hash = %tx.hash, error = %e, "Unparseable sender");
                None
            }
        };
        let to = match tx.to_address() {
            Some(Ok(addr)) => Some(addr),
            Some(Err(e)) => {
                debug!(hash = %tx.hash, error = %e, "Unparseable recipient");
                None
            }
            None => None,
        };

        self.watched(from) || self.watched(to)
    }

    fn watched(&self, address: Option<Address>) -> bool {
        address.is_some_and(|a| self.registry.is_subscribed(&a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_index::IndexError;

    const WATCHED: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OTHER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const STRANGER: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    struct Harness {
        indexer: Indexer,
        index: Arc<TransactionIndex>,
        height: Arc<AtomicU64>,
        errors: mpsc::UnboundedReceiver<PipelineError>,
    }

    fn harness() -> Harness {
        let index = Arc::new(TransactionIndex::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.subscribe(&Address::parse(WATCHED).unwrap());
        let height = Arc::new(AtomicU64::new(0));
        let (_tx, rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::unbounded_channel();

        Harness {
            indexer: Indexer::new(
                index.clone(),
                registry,
                rx,
                height.clone(),
                err_tx,
                CancellationToken::new(),
            ),
            index,
            height,
            errors: err_rx,
        }
    }

    fn tx(hash: &str, from: &str, to: Option<&str>) -> Transaction {
        Transaction::new(hash, from, to.map(str::to_string))
    }

    #[test]
    fn test_filters_by_either_endpoint() {
        let h = harness();
        // Upper-case spelling must still match the subscription
        let shouting = WATCHED.to_uppercase().replacen("0X", "0x", 1);
        h.indexer.process(Block::new(
            3,
            vec![
                tx("0x01", WATCHED, Some(OTHER)),
                tx("0x02", OTHER, Some(&shouting)),
                tx("0x03", OTHER, Some(STRANGER)),
                tx("0x04", STRANGER, None),
            ],
        ));

        let hashes: Vec<String> = h
            .index
            .query_by_address(&Address::parse(WATCHED).unwrap())
            .into_iter()
            .map(|t| t.hash)
            .collect();
        assert_eq!(hashes, vec!["0x01", "0x02"]);
        assert_eq!(h.index.len(), 2);
        assert_eq!(h.height.load(Ordering::Acquire), 3);
    }

    #[test]
    fn test_empty_block_still_advances_height() {
        let h = harness();
        h.indexer.process(Block::new(9, vec![tx("0x01", OTHER, Some(STRANGER))]));
        assert!(h.index.is_empty());
        assert_eq!(h.height.load(Ordering::Acquire), 9);
    }

    #[test]
    fn test_garbage_endpoint_is_not_a_match() {
        let h = harness();
        h.indexer
            .process(Block::new(1, vec![tx("0x01", "not-an-address", Some(OTHER))]));
        assert!(h.index.is_empty());
    }

    #[test]
    fn test_commit_failure_reported_height_still_advances() {
        let mut h = harness();
        h.indexer
            .process(Block::new(4, vec![tx("0x01", WATCHED, Some("0xnope"))]));

        assert!(matches!(
            h.errors.try_recv(),
            Ok(PipelineError::Commit { .. })
        ));
        assert!(h.index.is_empty());
        assert_eq!(h.height.load(Ordering::Acquire), 4);
    }

    #[test]
    fn test_malformed_match_drops_whole_block() {
        let mut h = harness();
        h.indexer.process(Block::new(
            5,
            vec![
                tx("0x01", WATCHED, Some(OTHER)),
                tx("0x02", OTHER, Some(WATCHED)),
                tx("0x03", WATCHED, Some("0xbroken")),
            ],
        ));

        match h.errors.try_recv() {
            Ok(PipelineError::Commit { block, source }) => {
                assert_eq!(block, "0x5");
                assert!(matches!(source, IndexError::InvalidRecipient { ref hash, .. } if hash == "0x03"));
            }
            other => panic!("expected a commit error, got {:?}", other),
        }
        assert!(h.index.get("0x01").is_none());
        assert!(h.index.get("0x02").is_none());
        assert!(h.index.is_empty());
        assert_eq!(h.height.load(Ordering::Acquire), 5);
    }

    #[test]
    fn test_bad_height_reported_and_counter_untouched() {
        let mut h = harness();
        h.indexer.process(Block::new(2, vec![]));

        let mut bad = Block::new(0, vec![tx("0x01", WATCHED, None)]);
        bad.number = "twelve".to_string();
        h.indexer.process(bad);

        assert!(matches!(
            h.errors.try_recv(),
            Ok(PipelineError::InvalidHeight { .. })
        ));
        // Transactions were still committed
        assert_eq!(h.index.len(), 1);
        assert_eq!(h.height.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_height_never_decreases() {
        let h = harness();
        h.indexer.process(Block::new(10, vec![]));
        h.indexer.process(Block::new(7, vec![]));
        assert_eq!(h.height.load(Ordering::Acquire), 10);
    }
}
