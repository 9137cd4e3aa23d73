//! Ledger Write Primitives
//!
//! Shared by the transfer and adjustment engines. Every balance change goes
//! through [`LedgerWriter::apply_delta`]: read with version, check, write
//! conditioned on that version, and on conflict re-read and re-check.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::error::{LedgerError, StoreError};
use super::store::{AccountStore, TransactionLog};
use super::types::{Account, AccountRef, TransactionId, TransactionRecord, Version};
use crate::config::EngineConfig;

/// Result of a committed balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDelta {
    /// Balance before the winning write
    pub previous: Decimal,
    pub balance: Decimal,
    pub version: Version,
    /// Attempts it took, including the winning one
    pub attempts: u32,
}

pub struct LedgerWriter {
    accounts: Arc<dyn AccountStore>,
    log: Arc<dyn TransactionLog>,
    config: EngineConfig,
}

impl LedgerWriter {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        log: Arc<dyn TransactionLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            accounts,
            log,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read an account snapshot, bounded by the call timeout
    pub async fn read(&self, account: &AccountRef) -> Result<Account, StoreError> {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, self.accounts.get_account(account)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.call_timeout_ms)),
        }
    }

    async fn conditional_put(
        &self,
        account: &AccountRef,
        new_balance: Decimal,
        expected: Version,
    ) -> Result<Version, StoreError> {
        let timeout = self.config.call_timeout();
        let put = self.accounts.put_balance(account, new_balance, expected);
        match tokio::time::timeout(timeout, put).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.call_timeout_ms)),
        }
    }

    /// Append a transaction record; idempotent on the record id
    pub async fn append(&self, record: &TransactionRecord) -> Result<TransactionId, StoreError> {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, self.log.append_transaction(record)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.call_timeout_ms)),
        }
    }

    /// Append, retrying transient failures up to `compensation_attempts`
    pub async fn append_persistent(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionId, StoreError> {
        let max_attempts = self.config.compensation_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.append(record).await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    debug!(txn_id = %record.id, attempt, error = %e, "Append failed, retrying");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    pub async fn history(&self, account: &AccountRef) -> Result<Vec<TransactionRecord>, StoreError> {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, self.log.history(account)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.call_timeout_ms)),
        }
    }

    /// Optimistic read-modify-write of one balance
    ///
    /// `guard` sees every fresh snapshot before the write and may reject it;
    /// a rejection is returned as-is and nothing is written. Version
    /// conflicts are retried up to `max_attempts`; any other store error is
    /// returned immediately, once a re-read shows the write did not land.
    pub async fn apply_delta<G>(
        &self,
        account: &AccountRef,
        delta: Decimal,
        guard: G,
    ) -> Result<AppliedDelta, LedgerError>
    where
        G: Fn(&Account) -> Result<(), LedgerError>,
    {
        self.run_delta(account, delta, self.config.max_attempts, false, guard)
            .await
    }

    /// Like [`apply_delta`](Self::apply_delta) but for writes that must land
    /// (refunds): uses `compensation_attempts` and also retries transient
    /// store failures.
    pub async fn apply_delta_persistent(
        &self,
        account: &AccountRef,
        delta: Decimal,
    ) -> Result<AppliedDelta, LedgerError> {
        self.run_delta(
            account,
            delta,
            self.config.compensation_attempts,
            true,
            |_| Ok(()),
        )
        .await
    }

    async fn run_delta<G>(
        &self,
        account: &AccountRef,
        delta: Decimal,
        max_attempts: u32,
        retry_transient: bool,
        guard: G,
    ) -> Result<AppliedDelta, LedgerError>
    where
        G: Fn(&Account) -> Result<(), LedgerError>,
    {
        let max_attempts = max_attempts.max(1);
        let mut last_transient: Option<StoreError> = None;

        for attempt in 1..=max_attempts {
            let snapshot = match self.read(account).await {
                Ok(snapshot) => snapshot,
                Err(e) if retry_transient && e.is_transient() => {
                    debug!(account = %account, attempt, error = %e, "Read failed, retrying");
                    last_transient = Some(e);
                    self.backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            guard(&snapshot)?;

            let new_balance = snapshot.balance + delta;
            if new_balance.is_sign_negative() && !new_balance.is_zero() {
                return Err(LedgerError::WouldGoNegative {
                    balance: snapshot.balance,
                    delta,
                });
            }

            match self
                .conditional_put(account, new_balance, snapshot.version)
                .await
            {
                Ok(version) => {
                    debug!(
                        account = %account,
                        attempt,
                        balance = %new_balance,
                        version = %version,
                        "Balance written"
                    );
                    return Ok(AppliedDelta {
                        previous: snapshot.balance,
                        balance: new_balance,
                        version,
                        attempts: attempt,
                    });
                }
                Err(StoreError::VersionConflict(_)) => {
                    debug!(
                        account = %account,
                        attempt,
                        expected = %snapshot.version,
                        "Version conflict, re-reading"
                    );
                }
                Err(e) if e.is_transient() => {
                    // A lost reply does not mean a lost write
                    if let Some(version) = self
                        .landed_anyway(account, snapshot.version, new_balance)
                        .await
                    {
                        warn!(
                            account = %account,
                            attempt,
                            error = %e,
                            version = %version,
                            "Write reported failure but landed"
                        );
                        return Ok(AppliedDelta {
                            previous: snapshot.balance,
                            balance: new_balance,
                            version,
                            attempts: attempt,
                        });
                    }
                    if !retry_transient {
                        return Err(e.into());
                    }
                    debug!(account = %account, attempt, error = %e, "Write failed, retrying");
                    last_transient = Some(e);
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < max_attempts {
                self.backoff(attempt).await;
            }
        }

        warn!(
            account = %account,
            attempts = max_attempts,
            "Balance write gave up"
        );
        match last_transient {
            Some(e) => Err(e.into()),
            None => Err(LedgerError::ConcurrentModification {
                attempts: max_attempts,
            }),
        }
    }

    /// Re-read after an ambiguous write failure
    ///
    /// The write counts as applied when the version moved off `expected` and
    /// the balance is exactly the one we tried to write. If the re-read fails
    /// too, the write is treated as not applied.
    async fn landed_anyway(
        &self,
        account: &AccountRef,
        expected: Version,
        new_balance: Decimal,
    ) -> Option<Version> {
        match self.read(account).await {
            Ok(fresh) if fresh.version != expected && fresh.balance == new_balance => {
                Some(fresh.version)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(account = %account, error = %e, "Could not verify failed write");
                None
            }
        }
    }

    /// Jittered exponential backoff: uniform in [0, min(max, base * 2^n)]
    async fn backoff(&self, attempt: u32) {
        let exp = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16));
        let cap = exp.min(self.config.backoff_max_ms);
        if cap == 0 {
            tokio::task::yield_now().await;
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=cap);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
