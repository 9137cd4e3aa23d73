//! Store clients
//!
//! Implementations of the ledger's [`AccountStore`](crate::ledger::AccountStore),
//! [`TransactionLog`](crate::ledger::TransactionLog) and
//! [`AccountDirectory`](crate::ledger::AccountDirectory) contracts.

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;
