//! Set of addresses whose transactions are being collected.
//!
//! Entries are never removed. `subscribe` is an atomic check-and-set on the
//! shard holding the address, so among concurrent callers for the same
//! address exactly one observes `true`.

use crate::address::Address;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// address -> unix timestamp of the first subscribe call
    addresses: DashMap<Address, i64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            addresses: DashMap::new(),
        }
    }

    /// Returns true iff this call added the address
    pub fn subscribe(&self, address: &Address) -> bool {
        match self.addresses.entry(*address) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(chrono::Utc::now().timestamp());
                tracing::info!(%address, "👀 Subscribed to address");
                true
            }
        }
    }

    pub fn is_subscribed(&self, address: &Address) -> bool {
        self.addresses.contains_key(address)
    }

    pub fn subscribed_at(&self, address: &Address) -> Option<i64> {
        self.addresses.get(address).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Snapshot of all subscribed addresses, sorted
    pub fn addresses(&self) -> Vec<Address> {
        let mut all: Vec<Address> = self.addresses.iter().map(|e| *e.key()).collect();
        all.sort();
        all
    }
}
