//! Transfer Journal
//!
//! Record of every transfer the engine has started, keyed by transfer id. It
//! is what makes replays idempotent: a journaled transfer is never
//! re-executed, only resumed (missing log writes) or answered from the
//! recorded outcome. All state updates are compare-and-swap.
//!
//! Opened with a path, every change is also written to a [`JournalWal`]
//! before the next step of the transfer runs, so a restarted process answers
//! replays the same way.

use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::LedgerError;
use super::state::TransferState;
use super::types::{AccountRef, Platform, TransactionId, TransferId, TransferIntent};
use super::wal::JournalWal;

/// What the caller asked for, compared on replay of a transfer id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub platform: Platform,
    pub sender: String,
    pub recipient: String,
    pub amount: Decimal,
    pub memo: Option<String>,
}

/// Journal entry for one transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub transfer_id: TransferId,
    pub fingerprint: RequestFingerprint,
    pub sender: AccountRef,
    pub recipient: AccountRef,
    pub amount: Decimal,
    pub memo: Option<String>,
    pub state: TransferState,
    /// Record ids are fixed up front so log retries are idempotent
    pub sender_txn_id: TransactionId,
    pub recipient_txn_id: TransactionId,
    pub sent_logged: bool,
    pub received_logged: bool,
    pub sender_balance: Option<Decimal>,
    pub recipient_balance: Option<Decimal>,
    /// Outcome to hand back on replay of a failed transfer
    pub error: Option<LedgerError>,
    pub retry_count: u32,
    /// Bumped on every change; the log keeps the highest
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Create a new entry in INIT state
    pub fn new(intent: &TransferIntent, fingerprint: RequestFingerprint) -> Self {
        let now = Utc::now();
        Self {
            transfer_id: intent.transfer_id,
            fingerprint,
            sender: intent.sender.account_ref.clone(),
            recipient: intent.recipient.account_ref.clone(),
            amount: intent.amount,
            memo: intent.memo.clone(),
            state: TransferState::Init,
            sender_txn_id: TransactionId::new(),
            recipient_txn_id: TransactionId::new(),
            sent_logged: false,
            received_logged: false,
            sender_balance: None,
            recipient_balance: None,
            error: None,
            retry_count: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Why [`TransferJournal::insert`] refused an entry
#[derive(Debug)]
pub enum InsertError {
    /// The transfer id is already journaled; here is its entry
    Taken(Box<JournalEntry>),
    /// The entry could not be written to the log and was not kept
    Unpersisted(io::Error),
}

/// Transfer journal operations
#[derive(Debug, Default)]
pub struct TransferJournal {
    entries: DashMap<TransferId, JournalEntry>,
    wal: Option<Mutex<JournalWal>>,
}

impl TransferJournal {
    /// In-memory journal; forgotten when the process exits
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal backed by a log file, reloading whatever it already holds
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let (wal, loaded) = JournalWal::open(path)?;
        let entries = DashMap::with_capacity(loaded.len());
        for entry in loaded {
            if !entry.state.is_terminal() {
                warn!(
                    transfer_id = %entry.transfer_id,
                    state = %entry.state,
                    "Reloaded unfinished transfer"
                );
            }
            entries.insert(entry.transfer_id, entry);
        }
        Ok(Self {
            entries,
            wal: Some(Mutex::new(wal)),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.wal.is_some()
    }

    fn wal(&self) -> Option<MutexGuard<'_, JournalWal>> {
        self.wal
            .as_ref()
            .map(|wal| wal.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Write a snapshot to the log; never called under a map lock
    fn persist(&self, entry: &JournalEntry) -> io::Result<()> {
        match self.wal() {
            Some(mut wal) => wal.append(entry),
            None => Ok(()),
        }
    }

    fn persist_or_log(&self, entry: &JournalEntry) {
        if let Err(e) = self.persist(entry) {
            error!(
                transfer_id = %entry.transfer_id,
                state = %entry.state,
                error = %e,
                "Journal log write failed"
            );
        }
    }

    /// Insert a new entry
    ///
    /// The check and the insert are one atomic step. With a log, the entry
    /// is on disk before this returns `Ok`.
    pub fn insert(&self, entry: JournalEntry) -> Result<(), InsertError> {
        match self.entries.entry(entry.transfer_id) {
            Entry::Occupied(existing) => {
                return Err(InsertError::Taken(Box::new(existing.get().clone())));
            }
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }
        if let Err(e) = self.persist(&entry) {
            self.entries.remove(&entry.transfer_id);
            return Err(InsertError::Unpersisted(e));
        }
        debug!(transfer_id = %entry.transfer_id, state = %entry.state, "Journal entry created");
        Ok(())
    }

    pub fn get(&self, transfer_id: TransferId) -> Option<JournalEntry> {
        self.entries.get(&transfer_id).map(|e| e.value().clone())
    }

    /// Atomic CAS: move to `new_state` only if the entry is in `expected`
    ///
    /// `apply` runs under the same lock, so fields change together with the
    /// state. Returns false if the state did not match or the edge is illegal.
    pub fn transition<F>(
        &self,
        transfer_id: TransferId,
        expected: TransferState,
        new_state: TransferState,
        apply: F,
    ) -> bool
    where
        F: FnOnce(&mut JournalEntry),
    {
        let snapshot = {
            let Some(mut entry) = self.entries.get_mut(&transfer_id) else {
                warn!(transfer_id = %transfer_id, "Transition on unknown transfer");
                return false;
            };
            if entry.state != expected || !expected.can_transition_to(new_state) {
                return false;
            }
            apply(&mut *entry);
            entry.state = new_state;
            touch(&mut *entry);
            entry.clone()
        };
        self.persist_or_log(&snapshot);
        true
    }

    /// Update non-state fields (e.g. a log write landed)
    pub fn update<F>(&self, transfer_id: TransferId, apply: F) -> bool
    where
        F: FnOnce(&mut JournalEntry),
    {
        let snapshot = match self.entries.get_mut(&transfer_id) {
            Some(mut entry) => {
                apply(&mut *entry);
                touch(&mut *entry);
                entry.clone()
            }
            None => return false,
        };
        self.persist_or_log(&snapshot);
        true
    }

    pub fn increment_retry(&self, transfer_id: TransferId) {
        self.update(transfer_id, |entry| entry.retry_count += 1);
    }

    /// Non-terminal entries untouched for longer than `threshold`, oldest first
    pub fn find_stale(&self, threshold: Duration, limit: usize) -> Vec<JournalEntry> {
        let cutoff = cutoff(threshold);
        let mut stale: Vec<JournalEntry> = self
            .entries
            .iter()
            .filter(|e| !e.state.is_terminal() && e.updated_at <= cutoff)
            .map(|e| e.value().clone())
            .collect();
        stale.sort_by_key(|e| e.updated_at);
        stale.truncate(limit);
        stale
    }

    pub fn find_in_state(&self, state: TransferState) -> Vec<JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Forget settled transfers untouched for longer than `retention`
    ///
    /// NEEDS_RECONCILIATION entries are kept until an operator deals with
    /// them. Returns how many entries were dropped.
    pub fn purge_settled(&self, retention: Duration) -> usize {
        let cutoff = cutoff(retention);
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.state.is_settled() && entry.updated_at <= cutoff;
            if expired {
                purged += 1;
            }
            !expired
        });
        if purged == 0 {
            return 0;
        }

        if let Some(mut wal) = self.wal() {
            // Map locks are taken under the log lock here, never the reverse
            let live: Vec<JournalEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
            if let Err(e) = wal.compact(&live) {
                error!(path = %wal.path().display(), error = %e, "Journal compaction failed");
            }
        }
        info!(purged, remaining = self.entries.len(), "Purged settled transfers");
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn touch(entry: &mut JournalEntry) {
    entry.revision += 1;
    entry.updated_at = Utc::now();
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero())
}
