//! Wallet Ledger - transfer engine for multi-platform digital wallets
//!
//! Moves money between accounts held in a remote store that offers only
//! per-record, version-conditioned writes.
//!
//! # Modules
//!
//! - [`money`] - Currency-precision amounts
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`ledger`] - Transfer and adjustment engines, journal, worker
//! - [`store`] - In-memory and HTTP store clients

pub mod config;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod store;

// Convenient re-exports at crate root
pub use config::{AppConfig, EngineConfig};
pub use ledger::{
    BalanceAdjuster, LedgerError, LedgerWriter, TransferEngine, TransferReceipt, TransferRequest,
};
pub use store::{HttpStore, MemoryStore};
