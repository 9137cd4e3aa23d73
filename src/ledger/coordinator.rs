//! Ledger Transfer Engine
//!
//! Orchestrates one transfer: validate → resolve → debit → credit → log.
//! All state changes are journaled with CAS transitions; the commit phase
//! runs detached from the caller so a dropped request cannot leave a
//! transfer half-applied.
//!
//! A caller-supplied transfer id is checked against the journal first and,
//! when the journal has never seen it, against the records already in both
//! parties' histories.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::error::{LedgerError, MissingEntries, ResolveError, StoreError};
use super::identity::{IdentityResolver, normalize};
use super::journal::{InsertError, JournalEntry, RequestFingerprint, TransferJournal};
use super::state::TransferState;
use super::types::{
    AccountRef, Direction, Platform, TransactionKind, TransactionRecord, TransactionStatus,
    TransactionId, TransferId, TransferIntent, TransferReceipt, TransferRequest,
};
use super::writer::LedgerWriter;
use crate::config::EngineConfig;
use crate::money;

/// Ledger Transfer Engine
///
/// Cheap to clone; clones share the journal.
#[derive(Clone)]
pub struct TransferEngine {
    writer: Arc<LedgerWriter>,
    resolver: Arc<dyn IdentityResolver>,
    journal: Arc<TransferJournal>,
}

impl TransferEngine {
    /// Engine with an in-memory journal
    pub fn new(writer: Arc<LedgerWriter>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self::with_journal(writer, resolver, Arc::new(TransferJournal::new()))
    }

    pub fn with_journal(
        writer: Arc<LedgerWriter>,
        resolver: Arc<dyn IdentityResolver>,
        journal: Arc<TransferJournal>,
    ) -> Self {
        Self {
            writer,
            resolver,
            journal,
        }
    }

    pub fn journal(&self) -> &Arc<TransferJournal> {
        &self.journal
    }

    pub fn config(&self) -> &EngineConfig {
        self.writer.config()
    }

    /// Execute a transfer
    ///
    /// Rejections (input and funds errors) leave balances and histories
    /// untouched. A request carrying an already-journaled `transfer_id` is
    /// answered from the journal and never moves money again.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, LedgerError> {
        // 1. Amount
        let amount = money::validate_amount(request.amount)?;

        let platform = request.platform;
        let sender_label = label(&request.sender, platform);
        let recipient_label = label(&request.recipient, platform);
        let memo = request
            .memo
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let fingerprint = RequestFingerprint {
            platform,
            sender: sender_label.clone(),
            recipient: recipient_label.clone(),
            amount,
            memo: memo.clone(),
        };

        if let Some(entry) = request.transfer_id.and_then(|id| self.journal.get(id)) {
            debug!(transfer_id = %entry.transfer_id, state = %entry.state, "Replay of journaled transfer");
            return self.replay(entry, &fingerprint).await;
        }

        // 2. Same identifier on both sides, before any lookup
        if sender_label == recipient_label {
            return Err(LedgerError::SelfTransferNotAllowed);
        }

        // 3. Resolve both parties
        let sender_ref = self
            .resolver
            .resolve(&request.sender, platform)
            .await
            .map_err(|e| match e {
                ResolveError::NotFound(who) => LedgerError::SenderNotFound(who),
                other => other.into(),
            })?;
        let recipient_ref = self
            .resolver
            .resolve(&request.recipient, platform)
            .await
            .map_err(|e| match e {
                ResolveError::NotFound(who) => LedgerError::RecipientNotFound(who),
                other => other.into(),
            })?;

        // Different identifiers may still name one account
        if sender_ref == recipient_ref {
            return Err(LedgerError::SelfTransferNotAllowed);
        }

        if let Some(transfer_id) = request.transfer_id {
            let recovered = self
                .recover_from_history(transfer_id, &sender_ref, &recipient_ref, &fingerprint)
                .await?;
            if let Some(entry) = recovered {
                return self.adopt(entry, &fingerprint).await;
            }
        }

        let sender = self.writer.read(&sender_ref).await.map_err(|e| match e {
            StoreError::NotFound(_) => LedgerError::SenderNotFound(sender_label.clone()),
            other => other.into(),
        })?;
        let recipient = self.writer.read(&recipient_ref).await.map_err(|e| match e {
            StoreError::NotFound(_) => LedgerError::RecipientNotFound(recipient_label.clone()),
            other => other.into(),
        })?;

        if sender.is_frozen() {
            return Err(LedgerError::AccountFrozen(sender_ref.to_string()));
        }
        if recipient.is_frozen() {
            return Err(LedgerError::AccountFrozen(recipient_ref.to_string()));
        }

        let intent = TransferIntent {
            transfer_id: request.transfer_id.unwrap_or_default(),
            sender,
            recipient,
            sender_label,
            recipient_label,
            amount,
            memo,
        };

        // Two requests racing on one id: only one gets to commit
        match self
            .journal
            .insert(JournalEntry::new(&intent, fingerprint.clone()))
        {
            Ok(()) => {}
            Err(InsertError::Taken(existing)) => return self.replay(*existing, &fingerprint).await,
            Err(InsertError::Unpersisted(e)) => {
                error!(transfer_id = %intent.transfer_id, error = %e, "Journal write failed, transfer not started");
                return Err(LedgerError::Internal(format!("journal unavailable: {}", e)));
            }
        }

        let engine = self.clone();
        let transfer_id = intent.transfer_id;
        match tokio::spawn(async move { engine.commit(intent).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(transfer_id = %transfer_id, error = %e, "Commit task aborted");
                Err(LedgerError::Internal(format!("commit task failed: {}", e)))
            }
        }
    }

    /// Drive a journaled transfer forward
    ///
    /// LOG_PENDING retries the missing log appends; finished transfers return
    /// their recorded outcome. Balances are never touched again.
    pub async fn resume(&self, transfer_id: TransferId) -> Result<TransferReceipt, LedgerError> {
        let entry = self
            .journal
            .get(transfer_id)
            .ok_or(LedgerError::TransferNotFound(transfer_id))?;
        self.resume_entry(entry).await
    }

    /// History of the account an identifier resolves to, newest first
    pub async fn history(
        &self,
        identifier: &str,
        platform: Platform,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let account = self.resolver.resolve(identifier, platform).await?;
        Ok(self.writer.history(&account).await?)
    }

    async fn replay(
        &self,
        entry: JournalEntry,
        fingerprint: &RequestFingerprint,
    ) -> Result<TransferReceipt, LedgerError> {
        if entry.fingerprint != *fingerprint {
            warn!(transfer_id = %entry.transfer_id, "Transfer id reused with different parameters");
            return Err(LedgerError::IdempotencyKeyReused(entry.transfer_id));
        }
        self.resume_entry(entry).await
    }

    /// Journal an entry rebuilt from the store and answer from it
    async fn adopt(
        &self,
        entry: JournalEntry,
        fingerprint: &RequestFingerprint,
    ) -> Result<TransferReceipt, LedgerError> {
        let transfer_id = entry.transfer_id;
        match self.journal.insert(entry.clone()) {
            Ok(()) => {
                info!(
                    transfer_id = %transfer_id,
                    state = %entry.state,
                    "Transfer recovered from transaction history"
                );
                self.resume_entry(entry).await
            }
            Err(InsertError::Taken(existing)) => self.replay(*existing, fingerprint).await,
            Err(InsertError::Unpersisted(e)) => {
                error!(transfer_id = %transfer_id, error = %e, "Recovered transfer not journaled");
                Err(LedgerError::Internal(format!("journal unavailable: {}", e)))
            }
        }
    }

    /// Rebuild the journal entry of a transfer this journal never saw
    ///
    /// Looks for records carrying `transfer_id` in both parties' histories.
    /// `None` means neither side has one, so no balance moved under this id
    /// as far as the store can tell. Records that do not match the request
    /// mean the id is being reused.
    async fn recover_from_history(
        &self,
        transfer_id: TransferId,
        sender_ref: &AccountRef,
        recipient_ref: &AccountRef,
        fingerprint: &RequestFingerprint,
    ) -> Result<Option<JournalEntry>, LedgerError> {
        let (sender_history, recipient_history) = tokio::try_join!(
            self.writer.history(sender_ref),
            self.writer.history(recipient_ref)
        )?;
        let mut sent = None;
        let mut received = None;
        for record in sender_history
            .into_iter()
            .chain(recipient_history)
            .filter(|r| r.transfer_id == Some(transfer_id))
        {
            match record.kind {
                TransactionKind::Sent if record.account == *sender_ref => sent = Some(record),
                TransactionKind::Received if record.account == *recipient_ref => {
                    received = Some(record)
                }
                _ => return Err(LedgerError::IdempotencyKeyReused(transfer_id)),
            }
        }
        if sent.is_none() && received.is_none() {
            return Ok(None);
        }

        let matches_request = sent.iter().all(|r| {
            r.amount == fingerprint.amount
                && r.counterparty == fingerprint.recipient
                && r.memo == fingerprint.memo
        }) && received.iter().all(|r| {
            r.amount == fingerprint.amount
                && r.counterparty == fingerprint.sender
                && r.memo == fingerprint.memo
        });
        if !matches_request {
            warn!(transfer_id = %transfer_id, "Transfer id found in history with different parameters");
            return Err(LedgerError::IdempotencyKeyReused(transfer_id));
        }

        let debit_pending = sent
            .as_ref()
            .is_some_and(|r| r.status == TransactionStatus::Pending);
        let now = Utc::now();
        let mut entry = JournalEntry {
            transfer_id,
            fingerprint: fingerprint.clone(),
            sender: sender_ref.clone(),
            recipient: recipient_ref.clone(),
            amount: fingerprint.amount,
            memo: fingerprint.memo.clone(),
            state: TransferState::LogPending,
            sender_txn_id: sent.as_ref().map_or_else(TransactionId::new, |r| r.id),
            recipient_txn_id: received.as_ref().map_or_else(TransactionId::new, |r| r.id),
            sent_logged: sent.is_some(),
            received_logged: received.is_some(),
            sender_balance: None,
            recipient_balance: None,
            error: None,
            retry_count: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        if debit_pending {
            entry.state = TransferState::NeedsReconciliation;
            entry.error = Some(LedgerError::TransferFailedNeedsReconciliation {
                transfer_id,
                reason: "sender debited, recipient never credited".into(),
            });
            return Ok(Some(entry));
        }

        entry.sender_balance = Some(self.balance_after(sent.as_ref(), sender_ref).await?);
        entry.recipient_balance = Some(self.balance_after(received.as_ref(), recipient_ref).await?);
        if entry.sent_logged && entry.received_logged {
            entry.state = TransferState::Committed;
        }
        Ok(Some(entry))
    }

    /// Balance a record left behind, or the current one when it carries none
    async fn balance_after(
        &self,
        record: Option<&TransactionRecord>,
        account: &AccountRef,
    ) -> Result<Decimal, LedgerError> {
        match record.and_then(|r| r.balance_after) {
            Some(balance) => Ok(balance),
            None => Ok(self.writer.read(account).await?.balance),
        }
    }

    async fn resume_entry(&self, entry: JournalEntry) -> Result<TransferReceipt, LedgerError> {
        let transfer_id = entry.transfer_id;
        match entry.state {
            TransferState::Committed => receipt(&entry),
            TransferState::LogPending => {
                self.journal.increment_retry(transfer_id);
                let engine = self.clone();
                match tokio::spawn(async move { engine.finish_log(transfer_id).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(LedgerError::Internal(format!("log task failed: {}", e))),
                }
            }
            TransferState::Failed
            | TransferState::RolledBack
            | TransferState::NeedsReconciliation => Err(entry.error.clone().unwrap_or_else(|| {
                LedgerError::Internal(format!("transfer {} ended without outcome", transfer_id))
            })),
            TransferState::Init
            | TransferState::Debited
            | TransferState::Credited
            | TransferState::Compensating => Err(LedgerError::TransferInProgress(transfer_id)),
        }
    }

    // ============================================================
    // Commit phase (runs in its own task)
    // ============================================================

    async fn commit(&self, intent: TransferIntent) -> Result<TransferReceipt, LedgerError> {
        let transfer_id = intent.transfer_id;
        let amount = intent.amount;
        let sender_ref = &intent.sender.account_ref;
        let recipient_ref = &intent.recipient.account_ref;

        // Debit: funds re-validated against every fresh read
        let debit = self
            .writer
            .apply_delta(sender_ref, -amount, |account| {
                if account.is_frozen() {
                    return Err(LedgerError::AccountFrozen(account.account_ref.to_string()));
                }
                if account.balance < amount {
                    return Err(LedgerError::InsufficientFunds {
                        balance: account.balance,
                        requested: amount,
                    });
                }
                Ok(())
            })
            .await;

        let debited = match debit {
            Ok(applied) => applied,
            Err(e) => {
                debug!(transfer_id = %transfer_id, error = %e, "Debit rejected");
                self.advance(transfer_id, TransferState::Init, TransferState::Failed, |entry| {
                    entry.error = Some(e.clone());
                });
                return Err(e);
            }
        };
        self.advance(transfer_id, TransferState::Init, TransferState::Debited, |entry| {
            entry.sender_balance = Some(debited.balance);
        });
        debug!(
            transfer_id = %transfer_id,
            sender = %sender_ref,
            balance = %debited.balance,
            attempts = debited.attempts,
            "Sender debited"
        );

        let credit = self
            .writer
            .apply_delta(recipient_ref, amount, |account| {
                if account.is_frozen() {
                    return Err(LedgerError::AccountFrozen(account.account_ref.to_string()));
                }
                Ok(())
            })
            .await;

        let credited = match credit {
            Ok(applied) => applied,
            Err(e) => return self.compensate(&intent, e).await,
        };
        self.advance(transfer_id, TransferState::Debited, TransferState::Credited, |entry| {
            entry.recipient_balance = Some(credited.balance);
        });
        info!(
            transfer_id = %transfer_id,
            platform = %sender_ref.platform,
            sender = %sender_ref,
            recipient = %recipient_ref,
            amount = %amount,
            "Balances committed"
        );

        self.finish_log(transfer_id).await
    }

    /// Refund the sender after a failed credit
    async fn compensate(
        &self,
        intent: &TransferIntent,
        cause: LedgerError,
    ) -> Result<TransferReceipt, LedgerError> {
        let transfer_id = intent.transfer_id;
        let sender_ref = &intent.sender.account_ref;
        warn!(transfer_id = %transfer_id, error = %cause, "Credit failed, refunding sender");

        self.advance(
            transfer_id,
            TransferState::Debited,
            TransferState::Compensating,
            |_| {},
        );

        match self
            .writer
            .apply_delta_persistent(sender_ref, intent.amount)
            .await
        {
            Ok(refund) => {
                let err = LedgerError::TransferFailedCompensated {
                    transfer_id,
                    reason: cause.to_string(),
                };
                self.advance(
                    transfer_id,
                    TransferState::Compensating,
                    TransferState::RolledBack,
                    |entry| {
                        entry.sender_balance = Some(refund.balance);
                        entry.error = Some(err.clone());
                    },
                );
                warn!(
                    transfer_id = %transfer_id,
                    sender = %sender_ref,
                    balance = %refund.balance,
                    "Transfer rolled back"
                );
                Err(err)
            }
            Err(refund_err) => {
                error!(
                    transfer_id = %transfer_id,
                    sender = %sender_ref,
                    amount = %intent.amount,
                    credit_error = %cause,
                    refund_error = %refund_err,
                    "CRITICAL: sender debited, credit and refund failed"
                );
                let err = LedgerError::TransferFailedNeedsReconciliation {
                    transfer_id,
                    reason: format!("credit failed: {}; refund failed: {}", cause, refund_err),
                };

                // Make the debit visible in the sender's history
                let sent_logged = match self.journal.get(transfer_id) {
                    Some(entry) => {
                        let record = sent_record(&entry, TransactionStatus::Pending);
                        match self.writer.append(&record).await {
                            Ok(_) => true,
                            Err(e) => {
                                error!(transfer_id = %transfer_id, error = %e, "Pending debit record not written");
                                false
                            }
                        }
                    }
                    None => false,
                };

                self.advance(
                    transfer_id,
                    TransferState::Compensating,
                    TransferState::NeedsReconciliation,
                    |entry| {
                        entry.sent_logged = sent_logged;
                        entry.error = Some(err.clone());
                    },
                );
                Err(err)
            }
        }
    }

    /// Append whichever of the two records is still missing, `sent` first
    async fn finish_log(&self, transfer_id: TransferId) -> Result<TransferReceipt, LedgerError> {
        let entry = self
            .journal
            .get(transfer_id)
            .ok_or(LedgerError::TransferNotFound(transfer_id))?;
        if !entry.state.balances_committed() {
            return Err(LedgerError::Internal(format!(
                "transfer {} has no committed balances in state {}",
                transfer_id, entry.state
            )));
        }

        let mut sent_logged = entry.sent_logged;
        if !sent_logged {
            let record = sent_record(&entry, TransactionStatus::Completed);
            match self.writer.append(&record).await {
                Ok(_) => sent_logged = true,
                Err(e) => warn!(transfer_id = %transfer_id, error = %e, "Sent record append failed"),
            }
        }

        let mut received_logged = entry.received_logged;
        if !received_logged {
            let record = received_record(&entry);
            match self.writer.append(&record).await {
                Ok(_) => received_logged = true,
                Err(e) => {
                    warn!(transfer_id = %transfer_id, error = %e, "Received record append failed")
                }
            }
        }

        self.journal.update(transfer_id, |e| {
            e.sent_logged = sent_logged;
            e.received_logged = received_logged;
        });

        let receipt = receipt(&entry)?;
        if sent_logged && received_logged {
            self.advance(transfer_id, entry.state, TransferState::Committed, |_| {});
            info!(
                transfer_id = %transfer_id,
                sender_balance = %receipt.sender_balance,
                recipient_balance = %receipt.recipient_balance,
                "Transfer committed"
            );
            return Ok(receipt);
        }

        if entry.state == TransferState::Credited {
            self.advance(
                transfer_id,
                TransferState::Credited,
                TransferState::LogPending,
                |_| {},
            );
        }
        warn!(
            transfer_id = %transfer_id,
            sent_missing = !sent_logged,
            received_missing = !received_logged,
            "Ledger write degraded, transfer left LOG_PENDING"
        );
        Err(LedgerError::LedgerWriteDegraded {
            transfer_id,
            sender_balance: receipt.sender_balance,
            recipient_balance: receipt.recipient_balance,
            sender_txn_id: receipt.sender_txn_id,
            recipient_txn_id: receipt.recipient_txn_id,
            missing: MissingEntries {
                sent: !sent_logged,
                received: !received_logged,
            },
        })
    }

    fn advance<F>(&self, transfer_id: TransferId, from: TransferState, to: TransferState, apply: F)
    where
        F: FnOnce(&mut JournalEntry),
    {
        if !self.journal.transition(transfer_id, from, to, apply) {
            warn!(
                transfer_id = %transfer_id,
                from = %from,
                to = %to,
                "Journal transition refused"
            );
        }
    }
}

/// Normalised identifier, or the trimmed input if it cannot be normalised
fn label(raw: &str, platform: Platform) -> String {
    normalize(raw, platform.identifier_kind()).unwrap_or_else(|| raw.trim().to_string())
}

fn receipt(entry: &JournalEntry) -> Result<TransferReceipt, LedgerError> {
    match (entry.sender_balance, entry.recipient_balance) {
        (Some(sender_balance), Some(recipient_balance)) => Ok(TransferReceipt {
            transfer_id: entry.transfer_id,
            sender_balance,
            recipient_balance,
            sender_txn_id: entry.sender_txn_id,
            recipient_txn_id: entry.recipient_txn_id,
        }),
        _ => Err(LedgerError::Internal(format!(
            "transfer {} has no recorded balances",
            entry.transfer_id
        ))),
    }
}

fn sent_record(entry: &JournalEntry, status: TransactionStatus) -> TransactionRecord {
    let mut record = record(
        entry,
        entry.sender.clone(),
        &entry.fingerprint.recipient,
        TransactionKind::Sent,
        status,
    );
    // A pending debit never reached its final balance
    if status == TransactionStatus::Completed {
        record.balance_after = entry.sender_balance;
    }
    record
}

fn received_record(entry: &JournalEntry) -> TransactionRecord {
    let mut record = record(
        entry,
        entry.recipient.clone(),
        &entry.fingerprint.sender,
        TransactionKind::Received,
        TransactionStatus::Completed,
    );
    record.balance_after = entry.recipient_balance;
    record
}

fn record(
    entry: &JournalEntry,
    account: AccountRef,
    counterparty: &str,
    kind: TransactionKind,
    status: TransactionStatus,
) -> TransactionRecord {
    let (id, direction) = match kind {
        TransactionKind::Received => (entry.recipient_txn_id, Direction::Credit),
        _ => (entry.sender_txn_id, Direction::Debit),
    };
    TransactionRecord {
        id,
        transfer_id: Some(entry.transfer_id),
        account,
        counterparty: counterparty.to_string(),
        amount: entry.amount,
        kind,
        direction,
        status,
        memo: entry.memo.clone(),
        balance_after: None,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::identity::DirectoryResolver;
    use crate::ledger::types::{AccountStatus, IdentifierKind};
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: TransferEngine,
        alice: AccountRef,
        bob: AccountRef,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = store.seed(Platform::SendWave, "1", "0917-000-0001", Decimal::new(10000, 2));
        let bob = store.seed(Platform::SendWave, "2", "0917-000-0002", Decimal::new(1000, 2));
        Fixture {
            engine: engine_over(&store),
            store,
            alice,
            bob,
        }
    }

    /// A separate engine (own empty journal) over the same store
    fn engine_over(store: &Arc<MemoryStore>) -> TransferEngine {
        let config = EngineConfig {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            ..EngineConfig::default()
        };
        let writer = Arc::new(LedgerWriter::new(store.clone(), store.clone(), config));
        let resolver = Arc::new(DirectoryResolver::new(store.clone(), Duration::from_secs(1)));
        TransferEngine::new(writer, resolver)
    }

    fn request(amount: i64) -> TransferRequest {
        TransferRequest::new(
            Platform::SendWave,
            "09170000001",
            "09170000002",
            Decimal::new(amount, 2),
        )
    }

    #[tokio::test]
    async fn test_transfer_moves_money_and_logs_pair() {
        let f = fixture();
        let receipt = f
            .engine
            .transfer(request(4000).with_memo("rent"))
            .await
            .unwrap();

        assert_eq!(receipt.sender_balance, Decimal::new(6000, 2));
        assert_eq!(receipt.recipient_balance, Decimal::new(5000, 2));
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(6000, 2)));
        assert_eq!(f.store.balance(&f.bob), Some(Decimal::new(5000, 2)));

        let sent = f.store.records(&f.alice);
        let received = f.store.records(&f.bob);
        assert_eq!(sent.len(), 1);
        assert_eq!(received.len(), 1);
        assert_eq!(sent[0].id, receipt.sender_txn_id);
        assert_eq!(sent[0].kind, TransactionKind::Sent);
        assert_eq!(sent[0].counterparty, "09170000002");
        assert_eq!(sent[0].memo.as_deref(), Some("rent"));
        assert_eq!(received[0].kind, TransactionKind::Received);
        assert_eq!(received[0].counterparty, "09170000001");
        assert_eq!(sent[0].transfer_id, received[0].transfer_id);
        assert_eq!(sent[0].transfer_id, Some(receipt.transfer_id));
        assert_eq!(sent[0].balance_after, Some(Decimal::new(6000, 2)));
        assert_eq!(received[0].balance_after, Some(Decimal::new(5000, 2)));

        let entry = f.engine.journal().get(receipt.transfer_id).unwrap();
        assert_eq!(entry.state, TransferState::Committed);
    }

    #[tokio::test]
    async fn test_validation_order() {
        let f = fixture();

        let err = f.engine.transfer(request(0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        // Self check runs before resolution, so an unknown number still fails as self
        let err = f
            .engine
            .transfer(TransferRequest::new(
                Platform::SendWave,
                "0999 999 9999",
                "09999999999",
                Decimal::ONE,
            ))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SelfTransferNotAllowed);

        let err = f
            .engine
            .transfer(TransferRequest::new(
                Platform::SendWave,
                "09990000000",
                "09170000002",
                Decimal::ONE,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SenderNotFound(_)));

        let err = f
            .engine
            .transfer(TransferRequest::new(
                Platform::SendWave,
                "09170000001",
                "09990000000",
                Decimal::ONE,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RecipientNotFound(_)));
        assert!(f.engine.journal().is_empty());
    }

    #[tokio::test]
    async fn test_alias_of_same_account_is_self_transfer() {
        let f = fixture();
        f.store
            .add_identifier(IdentifierKind::Mobile, "+639170000001", &f.alice);
        let err = f
            .engine
            .transfer(TransferRequest::new(
                Platform::SendWave,
                "09170000001",
                "+639170000001",
                Decimal::ONE,
            ))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SelfTransferNotAllowed);
    }

    #[tokio::test]
    async fn test_frozen_account_rejected() {
        let f = fixture();
        f.store.set_status(&f.bob, AccountStatus::Frozen);
        let err = f.engine.transfer(request(100)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountFrozen(_)));
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(10000, 2)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_journals_failure() {
        let f = fixture();
        let id = TransferId::new();
        let err = f
            .engine
            .transfer(request(20000).with_transfer_id(id))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(f.store.record_count(), 0);

        let entry = f.engine.journal().get(id).unwrap();
        assert_eq!(entry.state, TransferState::Failed);

        // Replay answers from the journal
        let again = f
            .engine
            .transfer(request(20000).with_transfer_id(id))
            .await
            .unwrap_err();
        assert_eq!(again, err);
    }

    #[tokio::test]
    async fn test_replay_committed_returns_first_receipt() {
        let f = fixture();
        let id = TransferId::new();
        let first = f
            .engine
            .transfer(request(1500).with_transfer_id(id))
            .await
            .unwrap();
        let puts = f.store.put_calls();

        let second = f
            .engine
            .transfer(request(1500).with_transfer_id(id))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(f.store.put_calls(), puts);
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(8500, 2)));
    }

    #[tokio::test]
    async fn test_replay_with_different_amount_rejected() {
        let f = fixture();
        let id = TransferId::new();
        f.engine
            .transfer(request(1500).with_transfer_id(id))
            .await
            .unwrap();
        let err = f
            .engine
            .transfer(request(1600).with_transfer_id(id))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::IdempotencyKeyReused(id));
    }

    #[tokio::test]
    async fn test_credit_failure_is_compensated() {
        let f = fixture();
        f.store.fail_puts(&f.bob, 1);

        let err = f.engine.transfer(request(4000)).await.unwrap_err();
        let LedgerError::TransferFailedCompensated { transfer_id, .. } = err else {
            panic!("expected compensation, got {:?}", err);
        };
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(10000, 2)));
        assert_eq!(f.store.balance(&f.bob), Some(Decimal::new(1000, 2)));
        assert_eq!(f.store.record_count(), 0);
        assert_eq!(
            f.engine.journal().get(transfer_id).unwrap().state,
            TransferState::RolledBack
        );
    }

    #[tokio::test]
    async fn test_failed_refund_needs_reconciliation() {
        let f = fixture();
        f.store.fail_puts(&f.bob, 1);
        // Debit lands, every refund attempt fails
        let budget = EngineConfig::default().compensation_attempts;
        f.store.fail_puts_after(&f.alice, 1, budget);

        let err = f.engine.transfer(request(4000)).await.unwrap_err();
        let LedgerError::TransferFailedNeedsReconciliation { transfer_id, .. } = err else {
            panic!("expected reconciliation, got {:?}", err);
        };
        assert!(err.money_moved());
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(6000, 2)));
        assert_eq!(
            f.engine.journal().get(transfer_id).unwrap().state,
            TransferState::NeedsReconciliation
        );

        let history = f.store.records(&f.alice);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransactionStatus::Pending);
        assert_eq!(history[0].kind, TransactionKind::Sent);
    }

    #[tokio::test]
    async fn test_degraded_write_resumes_without_moving_money() {
        let f = fixture();
        f.store.fail_appends_for(&f.bob, 1);

        let err = f.engine.transfer(request(4000)).await.unwrap_err();
        let LedgerError::LedgerWriteDegraded {
            transfer_id,
            missing,
            ..
        } = err
        else {
            panic!("expected degraded write, got {:?}", err);
        };
        assert!(!missing.sent);
        assert!(missing.received);
        assert_eq!(f.store.records(&f.alice).len(), 1);
        assert!(f.store.records(&f.bob).is_empty());

        let puts = f.store.put_calls();
        let receipt = f.engine.resume(transfer_id).await.unwrap();
        assert_eq!(f.store.put_calls(), puts);
        assert_eq!(receipt.recipient_balance, Decimal::new(5000, 2));
        assert_eq!(f.store.records(&f.bob).len(), 1);
        assert_eq!(f.store.records(&f.alice).len(), 1);
        assert_eq!(
            f.engine.journal().get(transfer_id).unwrap().state,
            TransferState::Committed
        );
    }

    #[tokio::test]
    async fn test_resume_unknown_transfer() {
        let f = fixture();
        let id = TransferId::new();
        assert_eq!(
            f.engine.resume(id).await.unwrap_err(),
            LedgerError::TransferNotFound(id)
        );
    }

    #[tokio::test]
    async fn test_lookup_outage_is_infrastructure_error() {
        let f = fixture();
        f.store.set_lookup_unavailable(true);
        let err = f.engine.transfer(request(100)).await.unwrap_err();
        assert!(matches!(err, LedgerError::LookupUnavailable(_)));
    }

    #[tokio::test]
    async fn test_history_resolves_identifier() {
        let f = fixture();
        f.engine.transfer(request(100)).await.unwrap();
        f.engine.transfer(request(200)).await.unwrap();
        let history = f
            .engine
            .history("0917 000 0001", Platform::SendWave)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, Decimal::new(200, 2));
    }

    #[tokio::test]
    async fn test_lost_credit_reply_is_not_refunded() {
        let f = fixture();
        f.store.lose_put_replies(&f.bob, 1);

        let receipt = f.engine.transfer(request(4000)).await.unwrap();
        assert_eq!(receipt.recipient_balance, Decimal::new(5000, 2));
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(6000, 2)));
        assert_eq!(f.store.balance(&f.bob), Some(Decimal::new(5000, 2)));
        assert_eq!(f.store.total_balance(), Decimal::new(11000, 2));
        assert_eq!(f.store.record_count(), 2);
    }

    #[tokio::test]
    async fn test_fresh_engine_finishes_degraded_transfer_from_history() {
        let f = fixture();
        let id = TransferId::new();
        // The sent record is lost, the received one lands
        f.store.fail_appends(1);
        let err = f
            .engine
            .transfer(request(2500).with_transfer_id(id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LEDGER_WRITE_DEGRADED");

        let restarted = engine_over(&f.store);
        let puts = f.store.put_calls();
        let receipt = restarted
            .transfer(request(2500).with_transfer_id(id))
            .await
            .unwrap();

        assert_eq!(f.store.put_calls(), puts);
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(7500, 2)));
        assert_eq!(f.store.balance(&f.bob), Some(Decimal::new(3500, 2)));
        assert_eq!(receipt.sender_balance, Decimal::new(7500, 2));
        assert_eq!(receipt.recipient_balance, Decimal::new(3500, 2));
        assert_eq!(f.store.records(&f.alice).len(), 1);
        assert_eq!(f.store.record_count(), 2);
        assert_eq!(
            restarted.journal().get(id).unwrap().state,
            TransferState::Committed
        );
    }

    #[tokio::test]
    async fn test_fresh_engine_answers_committed_transfer_from_history() {
        let f = fixture();
        let id = TransferId::new();
        let first = f
            .engine
            .transfer(request(1500).with_transfer_id(id))
            .await
            .unwrap();
        // Later transfers move the balances on
        f.engine.transfer(request(100)).await.unwrap();

        let restarted = engine_over(&f.store);
        let puts = f.store.put_calls();
        let again = restarted
            .transfer(request(1500).with_transfer_id(id))
            .await
            .unwrap();
        assert_eq!(again, first);
        assert_eq!(f.store.put_calls(), puts);

        let err = engine_over(&f.store)
            .transfer(request(1600).with_transfer_id(id))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::IdempotencyKeyReused(id));
    }

    #[tokio::test]
    async fn test_fresh_engine_does_not_retry_unreconciled_debit() {
        let f = fixture();
        let id = TransferId::new();
        f.store.fail_puts(&f.bob, 1);
        let budget = EngineConfig::default().compensation_attempts;
        f.store.fail_puts_after(&f.alice, 1, budget);
        let err = f
            .engine
            .transfer(request(4000).with_transfer_id(id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSFER_FAILED_NEEDS_RECONCILIATION");

        let restarted = engine_over(&f.store);
        let err = restarted
            .transfer(request(4000).with_transfer_id(id))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TransferFailedNeedsReconciliation { transfer_id, .. } if transfer_id == id
        ));
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(6000, 2)));
        assert_eq!(f.store.balance(&f.bob), Some(Decimal::new(1000, 2)));
        assert_eq!(
            restarted.journal().get(id).unwrap().state,
            TransferState::NeedsReconciliation
        );
    }

    #[tokio::test]
    async fn test_reversed_request_under_same_id_is_reuse() {
        let f = fixture();
        let id = TransferId::new();
        f.engine
            .transfer(request(1500).with_transfer_id(id))
            .await
            .unwrap();

        let reversed = TransferRequest::new(
            Platform::SendWave,
            "09170000002",
            "09170000001",
            Decimal::new(1500, 2),
        )
        .with_transfer_id(id);
        let err = engine_over(&f.store).transfer(reversed).await.unwrap_err();
        assert_eq!(err, LedgerError::IdempotencyKeyReused(id));
        assert_eq!(f.store.balance(&f.alice), Some(Decimal::new(8500, 2)));
    }
}
