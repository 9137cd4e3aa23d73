//! Ledger Transfer Engine
//!
//! Moves money between two accounts of one platform, and lets staff adjust
//! single accounts, on top of a remote store that has no multi-record
//! transactions.
//!
//! # Architecture
//!
//! - **Account Store / Transaction Log / Directory** ([`store`]): client
//!   traits for the remote data service
//! - **Identity Resolver** ([`identity`]): email / mobile / $cashtag → account
//! - **Ledger writer** ([`writer`]): version-conditioned read-modify-write
//!   with bounded, jittered retry; shared by both engines
//! - **Transfer engine** ([`coordinator`]) and **Balance Adjustment Engine**
//!   ([`adjust`])
//! - **Journal** ([`journal`]), optionally written through to a log file
//!   ([`wal`]), + **Reconciliation worker** ([`worker`])
//!
//! # State Machine
//!
//! ```text
//! INIT → DEBITED → CREDITED → COMMITTED
//!   ↓        ↓          ↘
//! FAILED  COMPENSATING   LOG_PENDING → COMMITTED
//!            ↓       ↘
//!      ROLLED_BACK   NEEDS_RECONCILIATION
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Version-conditioned writes only**: no balance is written without the
//!    version it was computed from
//! 2. **Debit before credit**: a failed credit refunds the sender
//! 3. **Balances once per transfer id**: replays and resumes only append
//!    missing history, with the record ids fixed at journal time
//! 4. **Detached commit**: once the debit starts, the commit runs to an
//!    outcome even if the caller goes away
//! 5. **Journal before balances**: a transfer is journaled (and, with a log
//!    file, synced) before its debit; an id the journal does not know is
//!    looked up in both parties' histories before any write

pub mod adjust;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod journal;
pub mod state;
pub mod store;
pub mod types;
pub mod wal;
pub mod worker;
pub mod writer;

// Re-exports for convenience
pub use adjust::BalanceAdjuster;
pub use coordinator::TransferEngine;
pub use error::{ErrorCategory, LedgerError, MissingEntries, ResolveError, StoreError};
pub use identity::{DirectoryResolver, IdentityResolver};
pub use journal::{InsertError, JournalEntry, TransferJournal};
pub use state::TransferState;
pub use store::{AccountDirectory, AccountStore, TransactionLog};
pub use types::{
    Account, AccountRef, AccountStatus, AdjustReceipt, AdjustRequest, Direction, IdentifierKind,
    OwnerId, Platform, TransactionId, TransactionKind, TransactionRecord, TransactionStatus,
    TransferId, TransferReceipt, TransferRequest, Version,
};
pub use wal::JournalWal;
pub use worker::{ReconciliationWorker, ScanReport, WorkerConfig};
pub use writer::LedgerWriter;
