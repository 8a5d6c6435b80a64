// src/tx_index.rs
//! Transaction index (txindex) for O(1) transaction lookups
//! Maps transaction hash -> transaction, and address -> hashes touching it
//!
//! Both maps live behind one `RwLock`. A batch passed to [`TransactionIndex::insert`]
//! is applied inside a single write critical section, so readers see either
//! none or all of it, and never the `from` side of a transaction without its
//! `to` side.

use crate::address::{Address, AddressError};
use crate::types::Transaction;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("transaction at position {position} has no hash")]
    MissingHash { position: usize },
    #[error("transaction {hash} has an invalid sender: {source}")]
    InvalidSender {
        hash: String,
        #[source]
        source: AddressError,
    },
    #[error("transaction {hash} has an invalid recipient: {source}")]
    InvalidRecipient {
        hash: String,
        #[source]
        source: AddressError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub transactions: usize,
    pub addresses: usize,
    /// Total address-list entries (one per endpoint per transaction)
    pub entries: usize,
}

#[derive(Default)]
struct IndexInner {
    by_hash: HashMap<String, Transaction>,
    by_address: HashMap<Address, Vec<String>>,
    entries: usize,
}

/// In-memory transaction index, rebuilt from the starting height on restart
#[derive(Default)]
pub struct TransactionIndex {
    inner: RwLock<IndexInner>,
}

struct Prepared {
    key: String,
    from: Address,
    to: Option<Address>,
    tx: Transaction,
}

impl TransactionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of transactions.
    ///
    /// The whole batch is validated before anything is written; an invalid
    /// transaction rejects the batch. Hashes that are already indexed are
    /// skipped, so re-inserting a transaction never duplicates address
    /// entries. Returns the number of newly indexed transactions.
    pub fn insert(&self, transactions: Vec<Transaction>) -> Result<usize, IndexError> {
        let mut prepared = Vec::with_capacity(transactions.len());
        for (position, tx) in transactions.into_iter().enumerate() {
            let key = tx.hash_key();
            if key.is_empty() {
                return Err(IndexError::MissingHash { position });
            }
            let from = tx
                .from_address()
                .map_err(|source| IndexError::InvalidSender {
                    hash: key.clone(),
                    source,
                })?;
            let to = tx
                .to_address()
                .transpose()
                .map_err(|source| IndexError::InvalidRecipient {
                    hash: key.clone(),
                    source,
                })?;
            prepared.push(Prepared { key, from, to, tx });
        }

        let mut inner = self.inner.write();
        let mut inserted = 0;
        for Prepared { key, from, to, tx } in prepared {
            if inner.by_hash.contains_key(&key) {
                tracing::debug!(hash = %key, "Transaction already indexed, skipping");
                continue;
            }

            inner.by_address.entry(from).or_default().push(key.clone());
            inner.entries += 1;
            // from == to yields two entries on purpose
            if let Some(to) = to {
                inner.by_address.entry(to).or_default().push(key.clone());
                inner.entries += 1;
            }
            inner.by_hash.insert(key, tx);
            inserted += 1;
        }

        Ok(inserted)
    }

    /// Transactions touching `address`, oldest first. Unknown addresses
    /// yield an empty vector.
    pub fn query_by_address(&self, address: &Address) -> Vec<Transaction> {
        let inner = self.inner.read();
        match inner.by_address.get(address) {
            Some(hashes) => hashes
                .iter()
                .filter_map(|hash| inner.by_hash.get(hash).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Get transaction by hash (any letter case)
    pub fn get(&self, hash: &str) -> Option<Transaction> {
        self.inner
            .read()
            .by_hash
            .get(&hash.trim().to_ascii_lowercase())
            .cloned()
    }

    /// Counters read under one lock acquisition
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        IndexStats {
            transactions: inner.by_hash.len(),
            addresses: inner.by_address.len(),
            entries: inner.entries,
        }
    }

    /// Get total number of indexed transactions
    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_hash.is_empty()
    }
}
