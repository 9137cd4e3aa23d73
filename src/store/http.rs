//! REST store client
//!
//! Talks JSON to the wallet backend:
//!
//! ```text
//! GET  {base}/accounts/{platform}/{owner}              -> Account
//! PUT  {base}/accounts/{platform}/{owner}              {balance, expected_version} -> {version}
//! GET  {base}/accounts/{platform}/lookup?kind=&value=  -> AccountRef | 404
//! POST {base}/transactions                             TransactionRecord -> {id}
//! GET  {base}/transactions?platform=&owner=            -> [TransactionRecord]
//! ```
//!
//! 404 → `NotFound`, 409 → `VersionConflict`, 5xx and transport errors →
//! `Unavailable`, other 4xx → `Rejected`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::ledger::error::StoreError;
use crate::ledger::store::{AccountDirectory, AccountStore, TransactionLog};
use crate::ledger::types::{
    Account, AccountRef, IdentifierKind, Platform, TransactionId, TransactionRecord, Version,
};

#[derive(Serialize)]
struct PutBalanceBody {
    balance: Decimal,
    expected_version: Version,
}

#[derive(Deserialize)]
struct PutBalanceResponse {
    version: Version,
}

#[derive(Deserialize)]
struct AppendResponse {
    id: TransactionId,
}

pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
    timeout_ms: u64,
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        info!(base_url = %config.base_url, "Initializing HTTP store client");

        let base = Url::parse(&config.base_url)
            .map_err(|e| StoreError::Rejected(format!("invalid base url {}: {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Rejected(format!(
                "base url cannot carry a path: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.call_timeout_ms))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            timeout_ms: config.call_timeout_ms,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn account_url(&self, account: &AccountRef) -> Url {
        self.url(&[
            "accounts",
            account.platform.as_str(),
            account.owner_id.as_str(),
        ])
    }

    fn transport_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.timeout_ms)
        } else {
            StoreError::Unavailable(format!("HTTP request failed: {}", e))
        }
    }

    async fn check(response: Response, what: &str) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, what, body = %body, "Store call failed");
        Err(status_error(status, what, &body))
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: Response,
        what: &str,
    ) -> Result<T, StoreError> {
        response
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to parse {} response: {}", what, e)))
    }
}

/// Map a non-success status onto the store contract
fn status_error(status: StatusCode, what: &str, body: &str) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(what.to_string()),
        StatusCode::CONFLICT => StoreError::VersionConflict(what.to_string()),
        s if s.is_server_error() => StoreError::Unavailable(format!("{} returned {}", what, s)),
        s => StoreError::Rejected(format!("{} returned {}: {}", what, s, body)),
    }
}

#[async_trait]
impl AccountStore for HttpStore {
    async fn get_account(&self, account: &AccountRef) -> Result<Account, StoreError> {
        let what = account.to_string();
        let response = self
            .client
            .get(self.account_url(account))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = Self::check(response, &what).await?;
        Self::parse(response, &what).await
    }

    async fn put_balance(
        &self,
        account: &AccountRef,
        new_balance: Decimal,
        expected: Version,
    ) -> Result<Version, StoreError> {
        let what = account.to_string();
        let response = self
            .client
            .put(self.account_url(account))
            .json(&PutBalanceBody {
                balance: new_balance,
                expected_version: expected,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = Self::check(response, &what).await?;
        let body: PutBalanceResponse = Self::parse(response, &what).await?;
        Ok(body.version)
    }
}

#[async_trait]
impl TransactionLog for HttpStore {
    async fn append_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionId, StoreError> {
        let what = format!("transaction {}", record.id);
        let response = self
            .client
            .post(self.url(&["transactions"]))
            .json(record)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = Self::check(response, &what).await?;
        let body: AppendResponse = Self::parse(response, &what).await?;
        Ok(body.id)
    }

    async fn history(&self, account: &AccountRef) -> Result<Vec<TransactionRecord>, StoreError> {
        let what = format!("history of {}", account);
        let response = self
            .client
            .get(self.url(&["transactions"]))
            .query(&[
                ("platform", account.platform.as_str()),
                ("owner", account.owner_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = Self::check(response, &what).await?;
        Self::parse(response, &what).await
    }
}

#[async_trait]
impl AccountDirectory for HttpStore {
    async fn find_account(
        &self,
        platform: Platform,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Option<AccountRef>, StoreError> {
        let what = format!("{} lookup", platform);
        let response = self
            .client
            .get(self.url(&["accounts", platform.as_str(), "lookup"]))
            .query(&[("kind", kind.as_str()), ("value", value)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, &what).await?;
        Self::parse(response, &what).await.map(Some)
    }
}
