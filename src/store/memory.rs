//! In-process store
//!
//! Implements all three store contracts over `DashMap`s. Used by the tests
//! and for local runs. Fault injection hooks let tests force version
//! conflicts, failing writes, failing appends, unavailable lookups and
//! latency without touching the engine.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::ledger::error::StoreError;
use crate::ledger::identity::normalize;
use crate::ledger::store::{AccountDirectory, AccountStore, TransactionLog};
use crate::ledger::types::{
    Account, AccountRef, AccountStatus, IdentifierKind, Platform, TransactionId,
    TransactionRecord, Version,
};

/// Let `skip` writes through, then fail the next `fail`
#[derive(Debug, Clone, Copy, Default)]
struct PutFault {
    skip: u32,
    fail: u32,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountRef, Account>,
    /// (seq, record); seq orders history newest first
    records: DashMap<TransactionId, (u64, TransactionRecord)>,
    directory: DashMap<(Platform, IdentifierKind, String), AccountRef>,
    next_seq: AtomicU64,

    // Fault injection
    forced_conflicts: DashMap<AccountRef, u32>,
    failing_puts: DashMap<AccountRef, PutFault>,
    lost_replies: DashMap<AccountRef, u32>,
    failing_appends: DashMap<AccountRef, u32>,
    failing_appends_all: AtomicU32,
    lookup_down: AtomicBool,
    latency_ms: AtomicU64,
    put_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an active account at version 1 and register its identifier
    /// under the platform's convention
    pub fn seed(
        &self,
        platform: Platform,
        owner_id: &str,
        identifier: &str,
        balance: Decimal,
    ) -> AccountRef {
        let account_ref = AccountRef::new(owner_id, platform);
        self.accounts.insert(
            account_ref.clone(),
            Account {
                account_ref: account_ref.clone(),
                balance,
                version: Version(1),
                status: AccountStatus::Active,
            },
        );
        self.add_identifier(platform.identifier_kind(), identifier, &account_ref);
        account_ref
    }

    /// Register an extra lookup identifier for an existing account
    pub fn add_identifier(&self, kind: IdentifierKind, identifier: &str, account: &AccountRef) {
        let value = normalize(identifier, kind).unwrap_or_else(|| identifier.trim().to_string());
        self.directory
            .insert((account.platform, kind, value), account.clone());
    }

    pub fn set_status(&self, account: &AccountRef, status: AccountStatus) -> bool {
        match self.accounts.get_mut(account) {
            Some(mut entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn account(&self, account: &AccountRef) -> Option<Account> {
        self.accounts.get(account).map(|a| a.value().clone())
    }

    pub fn balance(&self, account: &AccountRef) -> Option<Decimal> {
        self.accounts.get(account).map(|a| a.balance)
    }

    pub fn version(&self, account: &AccountRef) -> Option<Version> {
        self.accounts.get(account).map(|a| a.version)
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    /// History of one account, newest first
    pub fn records(&self, account: &AccountRef) -> Vec<TransactionRecord> {
        let mut found: Vec<(u64, TransactionRecord)> = self
            .records
            .iter()
            .filter(|r| r.value().1.account == *account)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));
        found.into_iter().map(|(_, r)| r).collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of `put_balance` calls that reached the store
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    // ============================================================
    // Fault injection
    // ============================================================

    /// Next `n` conditional writes on `account` lose with a version conflict
    pub fn inject_conflicts(&self, account: &AccountRef, n: u32) {
        self.forced_conflicts.insert(account.clone(), n);
    }

    /// Next `n` writes on `account` fail as unavailable
    pub fn fail_puts(&self, account: &AccountRef, n: u32) {
        self.fail_puts_after(account, 0, n);
    }

    /// Let `skip` writes on `account` succeed, then fail the next `n`
    pub fn fail_puts_after(&self, account: &AccountRef, skip: u32, n: u32) {
        self.failing_puts
            .insert(account.clone(), PutFault { skip, fail: n });
    }

    /// Next `n` successful writes on `account` land but report a timeout
    pub fn lose_put_replies(&self, account: &AccountRef, n: u32) {
        self.lost_replies.insert(account.clone(), n);
    }

    /// Next `n` appends of records on `account` fail as unavailable
    pub fn fail_appends_for(&self, account: &AccountRef, n: u32) {
        self.failing_appends.insert(account.clone(), n);
    }

    /// Next `n` appends fail, whatever the account
    pub fn fail_appends(&self, n: u32) {
        self.failing_appends_all.store(n, Ordering::SeqCst);
    }

    pub fn set_lookup_unavailable(&self, down: bool) {
        self.lookup_down.store(down, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        } else {
            // Give concurrent callers a chance to interleave
            tokio::task::yield_now().await;
        }
    }

    fn take_fault(map: &DashMap<AccountRef, u32>, account: &AccountRef) -> bool {
        match map.get_mut(account) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_put_fault(&self, account: &AccountRef) -> bool {
        match self.failing_puts.get_mut(account) {
            Some(mut fault) if fault.skip > 0 => {
                fault.skip -= 1;
                false
            }
            Some(mut fault) if fault.fail > 0 => {
                fault.fail -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_global_append_fault(&self) -> bool {
        self.failing_appends_all
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, account: &AccountRef) -> Result<Account, StoreError> {
        self.simulate_latency().await;
        self.account(account)
            .ok_or_else(|| StoreError::NotFound(account.to_string()))
    }

    async fn put_balance(
        &self,
        account: &AccountRef,
        new_balance: Decimal,
        expected: Version,
    ) -> Result<Version, StoreError> {
        self.simulate_latency().await;
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_put_fault(account) {
            return Err(StoreError::Unavailable(format!("injected write failure on {}", account)));
        }
        if Self::take_fault(&self.forced_conflicts, account) {
            return Err(StoreError::VersionConflict(account.to_string()));
        }
        if new_balance.is_sign_negative() && !new_balance.is_zero() {
            return Err(StoreError::Rejected(format!(
                "negative balance {} for {}",
                new_balance, account
            )));
        }

        // Compare and set under the shard lock
        let mut entry = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| StoreError::NotFound(account.to_string()))?;
        if entry.version != expected {
            return Err(StoreError::VersionConflict(account.to_string()));
        }
        entry.balance = new_balance;
        entry.version = entry.version.next();
        let version = entry.version;
        drop(entry);

        if Self::take_fault(&self.lost_replies, account) {
            return Err(StoreError::Timeout(0));
        }
        Ok(version)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn append_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionId, StoreError> {
        self.simulate_latency().await;

        if self.take_global_append_fault() || Self::take_fault(&self.failing_appends, &record.account)
        {
            return Err(StoreError::Unavailable(format!(
                "injected append failure for {}",
                record.id
            )));
        }

        self.records.entry(record.id).or_insert_with(|| {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            (seq, record.clone())
        });
        Ok(record.id)
    }

    async fn history(&self, account: &AccountRef) -> Result<Vec<TransactionRecord>, StoreError> {
        self.simulate_latency().await;
        Ok(self.records(account))
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn find_account(
        &self,
        platform: Platform,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Option<AccountRef>, StoreError> {
        self.simulate_latency().await;
        if self.lookup_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("directory offline".into()));
        }
        Ok(self
            .directory
            .get(&(platform, kind, value.to_string()))
            .map(|r| r.value().clone()))
    }
}
