//! Store Client Traits
//!
//! The engine never owns account or transaction storage. These traits are the
//! whole contract it needs from the remote data service. All methods are
//! single remote calls; the engine wraps each in its own timeout.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::StoreError;
use super::types::{
    Account, AccountRef, IdentifierKind, Platform, TransactionId, TransactionRecord, Version,
};

/// Typed read/write access to account balance records
///
/// Balances are only ever changed through [`AccountStore::put_balance`],
/// conditioned on the version read earlier.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read the current snapshot, including its version token
    async fn get_account(&self, account: &AccountRef) -> Result<Account, StoreError>;

    /// Write a new balance only if the stored version still equals `expected`
    ///
    /// Returns the new version. A stale `expected` fails with
    /// [`StoreError::VersionConflict`] and changes nothing.
    async fn put_balance(
        &self,
        account: &AccountRef,
        new_balance: Decimal,
        expected: Version,
    ) -> Result<Version, StoreError>;
}

/// Append-only transaction record writer
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Append a record; never fails with a conflict
    ///
    /// Appending a record whose id already exists is a no-op returning that id.
    async fn append_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionId, StoreError>;

    /// Records of one account, newest first
    async fn history(&self, account: &AccountRef) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Lookup of accounts by the identifier a human typed
///
/// `value` is already normalised for `kind`.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account(
        &self,
        platform: Platform,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Option<AccountRef>, StoreError>;
}
