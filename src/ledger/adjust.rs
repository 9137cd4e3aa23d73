//! Balance Adjustment Engine
//!
//! Staff-initiated single-account changes: `adjust` (either sign) and `fund`
//! (deposit). Same optimistic write path as transfers, one record each,
//! counterparty "admin". Account status is ignored so frozen accounts can
//! still be corrected.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info};

use super::error::LedgerError;
use super::types::{
    ADMIN_COUNTERPARTY, AccountRef, AdjustReceipt, AdjustRequest, Direction, TransactionId,
    TransactionKind, TransactionRecord, TransactionStatus,
};
use super::writer::LedgerWriter;
use crate::money;

#[derive(Clone)]
pub struct BalanceAdjuster {
    writer: Arc<LedgerWriter>,
}

impl BalanceAdjuster {
    pub fn new(writer: Arc<LedgerWriter>) -> Self {
        Self { writer }
    }

    /// Credit (positive delta) or debit (negative delta) an account
    ///
    /// A result below zero is rejected with `WouldGoNegative`.
    pub async fn adjust(&self, request: AdjustRequest) -> Result<AdjustReceipt, LedgerError> {
        let delta = money::validate_delta(request.delta)?;
        let direction = if delta.is_sign_negative() {
            Direction::Debit
        } else {
            Direction::Credit
        };
        self.apply(
            &request.account,
            delta,
            TransactionKind::Adjusted,
            direction,
            request.reason,
        )
        .await
    }

    /// Deposit into an account
    pub async fn fund(
        &self,
        account: &AccountRef,
        amount: Decimal,
        reason: Option<String>,
    ) -> Result<AdjustReceipt, LedgerError> {
        let amount = money::validate_amount(amount)?;
        self.apply(
            account,
            amount,
            TransactionKind::Deposit,
            Direction::Credit,
            reason,
        )
        .await
    }

    async fn apply(
        &self,
        account: &AccountRef,
        delta: Decimal,
        kind: TransactionKind,
        direction: Direction,
        reason: Option<String>,
    ) -> Result<AdjustReceipt, LedgerError> {
        let applied = self.writer.apply_delta(account, delta, |_| Ok(())).await?;

        let txn_id = TransactionId::new();
        let record = TransactionRecord {
            id: txn_id,
            transfer_id: None,
            account: account.clone(),
            counterparty: ADMIN_COUNTERPARTY.to_string(),
            amount: delta.abs(),
            kind,
            direction,
            status: TransactionStatus::Completed,
            memo: reason.filter(|r| !r.trim().is_empty()),
            balance_after: Some(applied.balance),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.writer.append_persistent(&record).await {
            error!(
                account = %account,
                txn_id = %txn_id,
                kind = %kind,
                delta = %delta,
                error = %e,
                "Balance changed but record append failed"
            );
            return Err(LedgerError::AdjustmentLogDegraded {
                account: account.to_string(),
                new_balance: applied.balance,
                txn_id,
            });
        }

        info!(
            account = %account,
            kind = %kind,
            delta = %delta,
            previous = %applied.previous,
            balance = %applied.balance,
            attempts = applied.attempts,
            "Balance adjusted"
        );

        Ok(AdjustReceipt {
            account: account.clone(),
            new_balance: applied.balance,
            version: applied.version,
            txn_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::types::{AccountStatus, Platform};
    use crate::money::MoneyError;
    use crate::store::memory::MemoryStore;

    fn setup(balance: i64) -> (Arc<MemoryStore>, BalanceAdjuster, AccountRef) {
        let store = Arc::new(MemoryStore::new());
        let account = store.seed(Platform::GCash, "9", "09171234567", Decimal::new(balance, 2));
        let config = EngineConfig {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            ..EngineConfig::default()
        };
        let writer = Arc::new(LedgerWriter::new(store.clone(), store.clone(), config));
        (store, BalanceAdjuster::new(writer), account)
    }

    #[tokio::test]
    async fn test_adjust_debit_records_magnitude_and_direction() {
        let (store, adjuster, account) = setup(10000);
        let receipt = adjuster
            .adjust(AdjustRequest {
                account: account.clone(),
                delta: Decimal::new(-2550, 2),
                reason: Some("chargeback".into()),
            })
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Decimal::new(7450, 2));

        let history = store.records(&account);
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert_eq!(record.id, receipt.txn_id);
        assert_eq!(record.kind, TransactionKind::Adjusted);
        assert_eq!(record.direction, Direction::Debit);
        assert_eq!(record.amount, Decimal::new(2550, 2));
        assert_eq!(record.counterparty, "admin");
        assert_eq!(record.memo.as_deref(), Some("chargeback"));
    }

    #[tokio::test]
    async fn test_adjust_would_go_negative() {
        let (store, adjuster, account) = setup(1000);
        let err = adjuster
            .adjust(AdjustRequest {
                account: account.clone(),
                delta: Decimal::new(-1001, 2),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WouldGoNegative { .. }));
        assert_eq!(store.balance(&account), Some(Decimal::new(1000, 2)));
        assert_eq!(store.record_count(), 0);

        // Exactly to zero is fine
        let receipt = adjuster
            .adjust(AdjustRequest {
                account,
                delta: Decimal::new(-1000, 2),
                reason: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_zero_delta_is_invalid_amount() {
        let (_, adjuster, account) = setup(1000);
        let err = adjuster
            .adjust(AdjustRequest {
                account,
                delta: Decimal::ZERO,
                reason: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount(MoneyError::Zero));
    }

    #[tokio::test]
    async fn test_fund_frozen_account_records_deposit() {
        let (store, adjuster, account) = setup(0);
        store.set_status(&account, AccountStatus::Frozen);
        let receipt = adjuster
            .fund(&account, Decimal::new(50000, 2), Some("cash in".into()))
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Decimal::new(50000, 2));
        let history = store.records(&account);
        assert_eq!(history[0].kind, TransactionKind::Deposit);
        assert_eq!(history[0].direction, Direction::Credit);
    }

    #[tokio::test]
    async fn test_fund_rejects_negative() {
        let (_, adjuster, account) = setup(0);
        let err = adjuster
            .fund(&account, Decimal::new(-100, 2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_adjust_survives_conflicts_and_append_blips() {
        let (store, adjuster, account) = setup(1000);
        store.inject_conflicts(&account, 3);
        store.fail_appends(2);
        let receipt = adjuster
            .adjust(AdjustRequest {
                account: account.clone(),
                delta: Decimal::new(500, 2),
                reason: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Decimal::new(1500, 2));
        assert_eq!(store.records(&account).len(), 1);
    }

    #[tokio::test]
    async fn test_append_outage_reports_degraded() {
        let (store, adjuster, account) = setup(1000);
        store.fail_appends(u32::MAX);
        let err = adjuster
            .adjust(AdjustRequest {
                account: account.clone(),
                delta: Decimal::new(500, 2),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(err.money_moved());
        assert_eq!(store.balance(&account), Some(Decimal::new(1500, 2)));
    }
}
