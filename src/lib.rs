//! txwatch: follows a chain block by block and keeps every transaction that
//! touches a subscribed address, queryable by address.
//!
//! The daemon (`src/main.rs`) wires these modules together; tests and
//! benches use them directly.

pub mod address;
pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod rpc;
pub mod shutdown;
pub mod subscriptions;
pub mod tx_index;
pub mod types;

pub use address::Address;
pub use pipeline::{Pipeline, PipelineError, ScanPolicy};
pub use shutdown::{Stoppable, ShutdownError};
pub use subscriptions::SubscriptionRegistry;
pub use tx_index::TransactionIndex;
pub use types::{Block, Transaction};
