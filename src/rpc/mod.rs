//! Chain client boundary: the node's JSON-RPC interface.

pub mod client;
pub mod message;

use crate::types::{Block, QuantityError};
use async_trait::async_trait;
use thiserror::Error;

pub use client::JsonRpcClient;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node answered HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode {method} response: {reason}")]
    Decode { method: &'static str, reason: String },

    #[error("invalid quantity in response: {0}")]
    Quantity(#[from] QuantityError),

    #[error("{0} returned no result")]
    MissingResult(&'static str),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// What the ingestion pipeline needs from a node.
///
/// `block_by_height` returns `Ok(None)` when the height is beyond the chain
/// tip; that is a polling condition, not an error. Callers bound each call
/// with their own timeout.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_height(&self) -> Result<u64, ClientError>;

    async fn block_by_height(
        &self,
        height: u64,
        include_transactions: bool,
    ) -> Result<Option<Block>, ClientError>;
}
