//! Ledger Error Types
//!
//! Three layers, converted upward with `?`:
//! - [`StoreError`] - account/transaction store client contract
//! - [`ResolveError`] - identity lookups
//! - [`LedgerError`] - caller-facing outcome taxonomy of both engines

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{TransactionId, TransferId};
use crate::money::MoneyError;

/// Store client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Conditional write lost the race; re-read and retry
    #[error("Version conflict on {0}")]
    VersionConflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0}ms")]
    Timeout(u64),

    /// The store refused the write outright (e.g. negative balance)
    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Transient failures the caller may retry as a whole request
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Identity resolution errors
///
/// `NotFound` rejects the request; `LookupUnavailable` may be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No account matches identifier '{0}'")]
    NotFound(String),

    #[error("Identity lookup unavailable: {0}")]
    LookupUnavailable(String),
}

/// Coarse classes of [`LedgerError`], used by callers to pick a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller's fault; never retried by the engine
    Input,
    /// Business rule; never retried
    Funds,
    /// Optimistic retries exhausted
    Contention,
    /// Remote dependency down; caller may retry the request
    Infrastructure,
    /// Some side effects happened; see the variant for remediation
    PartialFailure,
}

/// Which log entries of a transfer are still missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingEntries {
    pub sent: bool,
    pub received: bool,
}

/// Ledger engine errors
///
/// Error codes are stable for API responses. Serializable so the journal can
/// hand the recorded outcome back after a restart.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerError {
    // === Input Errors ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error("Sender and recipient must be different accounts")]
    SelfTransferNotAllowed,

    #[error("Sender not found: {0}")]
    SenderNotFound(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account is frozen: {0}")]
    AccountFrozen(String),

    #[error("Transfer id {0} was already used for a different request")]
    IdempotencyKeyReused(TransferId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    // === Funds Errors ===
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("Adjustment would make balance negative: balance {balance}, delta {delta}")]
    WouldGoNegative { balance: Decimal, delta: Decimal },

    // === Contention Errors ===
    #[error("Concurrent modification: gave up after {attempts} attempts")]
    ConcurrentModification { attempts: u32 },

    #[error("Transfer {0} is still in progress")]
    TransferInProgress(TransferId),

    // === Infrastructure Errors ===
    #[error("Identity lookup unavailable: {0}")]
    LookupUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The backend refused the call; retrying the same request will not help
    #[error("Store rejected the request: {0}")]
    StoreRejected(String),

    // === Partial-Failure Errors ===
    #[error("Transfer {transfer_id} failed after debit and was compensated: {reason}")]
    TransferFailedCompensated {
        transfer_id: TransferId,
        reason: String,
    },

    #[error("Transfer {transfer_id} failed after debit and needs reconciliation: {reason}")]
    TransferFailedNeedsReconciliation {
        transfer_id: TransferId,
        reason: String,
    },

    /// Money moved; some history entries could not be written yet
    #[error("Transfer {transfer_id} committed but ledger write degraded")]
    LedgerWriteDegraded {
        transfer_id: TransferId,
        sender_balance: Decimal,
        recipient_balance: Decimal,
        sender_txn_id: TransactionId,
        recipient_txn_id: TransactionId,
        missing: MissingEntries,
    },

    /// Adjustment applied; its history entry could not be written
    #[error("Adjustment on {account} applied but its record was not written")]
    AdjustmentLogDegraded {
        account: String,
        new_balance: Decimal,
        txn_id: TransactionId,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::SelfTransferNotAllowed => "SELF_TRANSFER_NOT_ALLOWED",
            LedgerError::SenderNotFound(_) => "SENDER_NOT_FOUND",
            LedgerError::RecipientNotFound(_) => "RECIPIENT_NOT_FOUND",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::AccountFrozen(_) => "ACCOUNT_FROZEN",
            LedgerError::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::WouldGoNegative { .. } => "WOULD_GO_NEGATIVE",
            LedgerError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            LedgerError::TransferInProgress(_) => "TRANSFER_IN_PROGRESS",
            LedgerError::LookupUnavailable(_) => "LOOKUP_UNAVAILABLE",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::StoreRejected(_) => "STORE_REJECTED",
            LedgerError::TransferFailedCompensated { .. } => "TRANSFER_FAILED_COMPENSATED",
            LedgerError::TransferFailedNeedsReconciliation { .. } => {
                "TRANSFER_FAILED_NEEDS_RECONCILIATION"
            }
            LedgerError::LedgerWriteDegraded { .. } => "LEDGER_WRITE_DEGRADED",
            LedgerError::AdjustmentLogDegraded { .. } => "ADJUSTMENT_LOG_DEGRADED",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::SelfTransferNotAllowed
            | LedgerError::SenderNotFound(_)
            | LedgerError::RecipientNotFound(_)
            | LedgerError::AccountNotFound(_)
            | LedgerError::AccountFrozen(_)
            | LedgerError::IdempotencyKeyReused(_)
            | LedgerError::TransferNotFound(_)
            | LedgerError::StoreRejected(_) => ErrorCategory::Input,
            LedgerError::InsufficientFunds { .. } | LedgerError::WouldGoNegative { .. } => {
                ErrorCategory::Funds
            }
            LedgerError::ConcurrentModification { .. } | LedgerError::TransferInProgress(_) => {
                ErrorCategory::Contention
            }
            LedgerError::LookupUnavailable(_)
            | LedgerError::StoreUnavailable(_)
            | LedgerError::Internal(_) => ErrorCategory::Infrastructure,
            LedgerError::TransferFailedCompensated { .. }
            | LedgerError::TransferFailedNeedsReconciliation { .. }
            | LedgerError::LedgerWriteDegraded { .. }
            | LedgerError::AdjustmentLogDegraded { .. } => ErrorCategory::PartialFailure,
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::SelfTransferNotAllowed
            | LedgerError::IdempotencyKeyReused(_) => 400,
            LedgerError::SenderNotFound(_)
            | LedgerError::RecipientNotFound(_)
            | LedgerError::AccountNotFound(_)
            | LedgerError::TransferNotFound(_) => 404,
            LedgerError::ConcurrentModification { .. } | LedgerError::TransferInProgress(_) => 409,
            LedgerError::AccountFrozen(_)
            | LedgerError::StoreRejected(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::WouldGoNegative { .. } => 422,
            LedgerError::TransferFailedCompensated { .. } | LedgerError::Internal(_) => 500,
            LedgerError::LedgerWriteDegraded { .. }
            | LedgerError::AdjustmentLogDegraded { .. }
            | LedgerError::TransferFailedNeedsReconciliation { .. } => 202,
            LedgerError::LookupUnavailable(_) | LedgerError::StoreUnavailable(_) => 503,
        }
    }

    /// Whether balances were changed by the failed operation
    ///
    /// Only degraded ledger writes and an unreconciled debit leave money moved.
    pub fn money_moved(&self) -> bool {
        matches!(
            self,
            LedgerError::LedgerWriteDegraded { .. }
                | LedgerError::AdjustmentLogDegraded { .. }
                | LedgerError::TransferFailedNeedsReconciliation { .. }
        )
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Infrastructure | ErrorCategory::Contention
        ) || matches!(self, LedgerError::LedgerWriteDegraded { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => LedgerError::AccountNotFound(what),
            StoreError::VersionConflict(_) => LedgerError::ConcurrentModification { attempts: 1 },
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                LedgerError::StoreUnavailable(e.to_string())
            }
            StoreError::Rejected(why) => LedgerError::StoreRejected(why),
        }
    }
}

/// Callers that know which party was being resolved map `NotFound` to
/// `SenderNotFound`/`RecipientNotFound` themselves.
impl From<ResolveError> for LedgerError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(who) => LedgerError::AccountNotFound(who),
            ResolveError::LookupUnavailable(why) => LedgerError::LookupUnavailable(why),
        }
    }
}
