//! Chain data as delivered by the node's JSON-RPC interface.
//!
//! Payload fields are carried in their hex wire form; only `from`, `to`,
//! `hash` and the block `number` are ever interpreted.

use crate::address::{Address, AddressError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity is missing the 0x prefix: {0:?}")]
    MissingPrefix(String),
    #[error("quantity has no digits")]
    Empty,
    #[error("invalid hex quantity {value:?}: {reason}")]
    Invalid { value: String, reason: String },
}

/// Decode a JSON-RPC hex quantity (`"0x1b4"`) into a `u64`.
pub fn parse_quantity(value: &str) -> Result<u64, QuantityError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| QuantityError::MissingPrefix(value.to_string()))?;

    if digits.is_empty() {
        return Err(QuantityError::Empty);
    }

    u64::from_str_radix(digits, 16).map_err(|e| QuantityError::Invalid {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a height as a JSON-RPC hex quantity.
pub fn format_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: String,
    #[serde(default)]
    pub storage_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// Absent for contract creation
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub gas: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_blob_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_versioned_hashes: Option<Vec<String>>,
    #[serde(default)]
    pub v: String,
    #[serde(default)]
    pub r: String,
    #[serde(default)]
    pub s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_parity: Option<String>,
}

impl Transaction {
    /// Minimal transaction with only identity and endpoints filled in.
    pub fn new(hash: impl Into<String>, from: impl Into<String>, to: Option<String>) -> Self {
        Self {
            hash: hash.into(),
            from: from.into(),
            to,
            ..Default::default()
        }
    }

    pub fn from_address(&self) -> Result<Address, AddressError> {
        Address::parse(&self.from)
    }

    /// `None` for contract creation
    pub fn to_address(&self) -> Option<Result<Address, AddressError>> {
        self.to
            .as_deref()
            .filter(|to| !to.is_empty())
            .map(Address::parse)
    }

    /// Hash key used by the index (hashes compare case-insensitively)
    pub fn hash_key(&self) -> String {
        self.hash.trim().to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Null for pending blocks
    #[serde(default)]
    pub hash: Option<String>,
    pub number: String,
    #[serde(default)]
    pub parent_hash: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub gas_limit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: u64, transactions: Vec<Transaction>) -> Self {
        Self {
            number: format_quantity(height),
            transactions,
            ..Default::default()
        }
    }

    pub fn height(&self) -> Result<u64, QuantityError> {
        parse_quantity(&self.number)
    }
}
