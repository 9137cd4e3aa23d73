//! Transfer State Definitions
//!
//! Lifecycle of one transfer as tracked by the journal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer states
///
/// Terminal: COMMITTED, FAILED, ROLLED_BACK, NEEDS_RECONCILIATION.
/// LOG_PENDING is resumable: money moved, history incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    /// Validated and journaled; nothing written yet
    Init,

    /// Sender debit committed - funds are IN-FLIGHT
    /// Must eventually reach CREDITED or ROLLED_BACK
    Debited,

    /// Both balance mutations committed
    Credited,

    /// Balances moved, one or both log appends still missing
    LogPending,

    /// Terminal: balances moved and both records appended
    Committed,

    /// Terminal: rejected before any balance changed
    Failed,

    /// Refunding the sender after a failed credit
    Compensating,

    /// Terminal: sender refunded
    RolledBack,

    /// Terminal: sender debited, credit and refund both failed
    NeedsReconciliation,
}

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed
                | TransferState::Failed
                | TransferState::RolledBack
                | TransferState::NeedsReconciliation
        )
    }

    /// Terminal with nothing left for an operator; safe to forget after a while
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TransferState::Committed | TransferState::Failed | TransferState::RolledBack
        )
    }

    /// Both balances changed; only history may lag
    #[inline]
    pub fn balances_committed(&self) -> bool {
        matches!(
            self,
            TransferState::Credited | TransferState::LogPending | TransferState::Committed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Init => "INIT",
            TransferState::Debited => "DEBITED",
            TransferState::Credited => "CREDITED",
            TransferState::LogPending => "LOG_PENDING",
            TransferState::Committed => "COMMITTED",
            TransferState::Failed => "FAILED",
            TransferState::Compensating => "COMPENSATING",
            TransferState::RolledBack => "ROLLED_BACK",
            TransferState::NeedsReconciliation => "NEEDS_RECONCILIATION",
        }
    }

    /// Allowed FSM edges
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Init, Debited)
                | (Init, Failed)
                | (Debited, Credited)
                | (Debited, Compensating)
                | (Credited, Committed)
                | (Credited, LogPending)
                | (LogPending, Committed)
                | (Compensating, RolledBack)
                | (Compensating, NeedsReconciliation)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
