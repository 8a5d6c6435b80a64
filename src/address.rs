// src/address.rs
//! Account addresses.
//!
//! Every address that is used as a map key or compared for subscription
//! membership goes through [`Address`]. Parsing is case-insensitive and the
//! canonical rendering is `0x` followed by 40 lowercase hex digits, so two
//! spellings of the same account always compare equal.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of raw bytes in an account address
pub const ADDRESS_BYTES: usize = 20;
const ADDRESS_HEX_LEN: usize = ADDRESS_BYTES * 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_BYTES]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address must have {expected} hex digits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    /// Parse an address in any letter case, with or without a `0x` prefix.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != ADDRESS_HEX_LEN {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_HEX_LEN,
                actual: digits.len(),
            });
        }

        let mut bytes = [0u8; ADDRESS_BYTES];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| AddressError::InvalidHex(trimmed.to_string()))?;

        Ok(Self(bytes))
    }

    /// Canonical `0x`-prefixed lowercase form
    pub fn to_canonical(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "0xAbCdEf0123456789aBcDeF0123456789ABCDEF01";

    #[test]
    fn test_parse_normalizes_case() {
        let addr = Address::parse(MIXED).unwrap();
        assert_eq!(
            addr.to_canonical(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
        assert_eq!(addr.to_string(), addr.to_canonical());
    }

    #[test]
    fn test_prefix_is_optional() {
        let with = Address::parse(MIXED).unwrap();
        let without = Address::parse(&MIXED[2..]).unwrap();
        let upper_prefix = Address::parse(&format!("0X{}", &MIXED[2..])).unwrap();
        assert_eq!(with, without);
        assert_eq!(with, upper_prefix);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(Address::parse(""), Err(AddressError::Empty));
        assert_eq!(Address::parse("   "), Err(AddressError::Empty));
        assert!(matches!(
            Address::parse("0x1234"),
            Err(AddressError::InvalidLength {
                expected: 40,
                actual: 4
            })
        ));
        assert!(matches!(
            Address::parse("0xzz23456789abcdef0123456789abcdef01234567"),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_serde_uses_canonical_form() {
        let addr: Address = serde_json::from_str(&format!("\"{}\"", MIXED)).unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0xabcdef0123456789abcdef0123456789abcdef01\"");

        let bad: Result<Address, _> = serde_json::from_str("\"0x12\"");
        assert!(bad.is_err());
    }
}
