//! Ledger Core Types
//!
//! Accounts, transaction records and the request/receipt shapes exchanged
//! with the Ledger Transfer Engine and the Balance Adjustment Engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transfer ID - ULID-based correlation id shared by both sides of a transfer
///
/// Also the idempotency key: a replayed request carrying the same id never
/// mutates balances a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Transaction record ID, generated before the append so retries reuse it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Wallet brand an account lives on
///
/// An owner holds at most one account per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GCash,
    Binance,
    PayPal,
    CashApp,
    QuickCash,
    SendWave,
    CryptoPort,
    PayFlow,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::GCash,
        Platform::Binance,
        Platform::PayPal,
        Platform::CashApp,
        Platform::QuickCash,
        Platform::SendWave,
        Platform::CryptoPort,
        Platform::PayFlow,
    ];

    /// Which human identifier users of this platform type into "send money"
    pub fn identifier_kind(&self) -> IdentifierKind {
        match self {
            Platform::GCash | Platform::SendWave => IdentifierKind::Mobile,
            Platform::CashApp => IdentifierKind::Username,
            Platform::Binance
            | Platform::PayPal
            | Platform::QuickCash
            | Platform::CryptoPort
            | Platform::PayFlow => IdentifierKind::Email,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GCash => "gcash",
            Platform::Binance => "binance",
            Platform::PayPal => "paypal",
            Platform::CashApp => "cashapp",
            Platform::QuickCash => "quickcash",
            Platform::SendWave => "sendwave",
            Platform::CryptoPort => "cryptoport",
            Platform::PayFlow => "payflow",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown platform: {}", s))
    }
}

/// Identifier convention used for lookups on a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Email,
    Mobile,
    Username,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Email => "email",
            IdentifierKind::Mobile => "mobile",
            IdentifierKind::Username => "username",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque, stable owner identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical account reference: (owner, platform)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub owner_id: OwnerId,
    pub platform: Platform,
}

impl AccountRef {
    pub fn new(owner_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            owner_id: OwnerId::new(owner_id),
            platform,
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.owner_id)
    }
}

/// Account status; staff may freeze an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Frozen,
}

/// Opaque optimistic-concurrency token, bumped by the store on every write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Account snapshot as read from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(flatten)]
    pub account_ref: AccountRef,
    /// Never negative at any observable state
    pub balance: Decimal,
    pub version: Version,
    #[serde(default)]
    pub status: AccountStatus,
}

impl Account {
    pub fn is_frozen(&self) -> bool {
        self.status == AccountStatus::Frozen
    }
}

/// What a TransactionRecord represents on its account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Sent,
    Received,
    Adjusted,
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Sent => "sent",
            TransactionKind::Received => "received",
            TransactionKind::Adjusted => "adjusted",
            TransactionKind::Deposit => "deposit",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

/// Sign of a record's amount relative to its account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

/// Counterparty label for staff-initiated records
pub const ADMIN_COUNTERPARTY: &str = "admin";

/// Append-only transaction history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Shared by the `sent`/`received` pair of one transfer
    pub transfer_id: Option<TransferId>,
    pub account: AccountRef,
    /// Identifier of the other party, or "admin"
    pub counterparty: String,
    /// Always positive; see `direction`
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub memo: Option<String>,
    /// Account balance right after this record's change, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Signed effect of this record on its account balance
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Txn[{}] {} {} {} counterparty={} status={:?}",
            self.id, self.account, self.kind, self.amount, self.counterparty, self.status
        )
    }
}

/// Client transfer request: human identifiers, not yet resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub platform: Platform,
    pub sender: String,
    pub recipient: String,
    pub amount: Decimal,
    #[serde(default)]
    pub memo: Option<String>,
    /// Client-provided idempotency key (optional)
    #[serde(default)]
    pub transfer_id: Option<TransferId>,
}

impl TransferRequest {
    pub fn new(
        platform: Platform,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            platform,
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            memo: None,
            transfer_id: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_transfer_id(mut self, transfer_id: TransferId) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }
}

/// Resolved, validated transfer; lives only for the duration of the commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub transfer_id: TransferId,
    pub sender: Account,
    pub recipient: Account,
    /// Identifiers as typed (normalised); used as counterparty labels
    pub sender_label: String,
    pub recipient_label: String,
    pub amount: Decimal,
    pub memo: Option<String>,
}

/// Successful transfer outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub sender_balance: Decimal,
    pub recipient_balance: Decimal,
    pub sender_txn_id: TransactionId,
    pub recipient_txn_id: TransactionId,
}

/// Staff balance change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustRequest {
    pub account: AccountRef,
    /// Positive credits, negative debits; never zero
    pub delta: Decimal,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Successful adjustment/deposit outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustReceipt {
    pub account: AccountRef,
    pub new_balance: Decimal,
    pub version: Version,
    pub txn_id: TransactionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_and_display() {
        assert_eq!("SendWave".parse::<Platform>(), Ok(Platform::SendWave));
        assert_eq!(" paypal ".parse::<Platform>(), Ok(Platform::PayPal));
        assert!("venmo".parse::<Platform>().is_err());
        for p in Platform::ALL {
            assert_eq!(p.to_string().parse::<Platform>(), Ok(p));
        }
    }

    #[test]
    fn test_platform_identifier_conventions() {
        assert_eq!(Platform::SendWave.identifier_kind(), IdentifierKind::Mobile);
        assert_eq!(Platform::GCash.identifier_kind(), IdentifierKind::Mobile);
        assert_eq!(Platform::CashApp.identifier_kind(), IdentifierKind::Username);
        assert_eq!(Platform::PayPal.identifier_kind(), IdentifierKind::Email);
    }

    #[test]
    fn test_platform_serde_lowercase() {
        let json = serde_json::to_string(&Platform::QuickCash).unwrap();
        assert_eq!(json, "\"quickcash\"");
    }

    #[test]
    fn test_transfer_ids_unique_and_parse() {
        let a = TransferId::new();
        let b = TransferId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<TransferId>().unwrap(), a);
    }

    #[test]
    fn test_signed_amount() {
        let record = TransactionRecord {
            id: TransactionId::new(),
            transfer_id: None,
            account: AccountRef::new("7", Platform::SendWave),
            counterparty: ADMIN_COUNTERPARTY.to_string(),
            amount: Decimal::new(2500, 2),
            kind: TransactionKind::Adjusted,
            direction: Direction::Debit,
            status: TransactionStatus::Completed,
            memo: None,
            balance_after: None,
            timestamp: Utc::now(),
        };
        assert_eq!(record.signed_amount(), Decimal::new(-2500, 2));
    }

    #[test]
    fn test_account_ref_display() {
        let r = AccountRef::new("42", Platform::GCash);
        assert_eq!(r.to_string(), "gcash/42");
    }
}
