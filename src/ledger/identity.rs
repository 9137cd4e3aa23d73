//! Identity Resolver
//!
//! Maps what a user typed into "send to" (email, mobile number or $cashtag,
//! depending on the platform) to a canonical [`AccountRef`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::{ResolveError, StoreError};
use super::store::AccountDirectory;
use super::types::{AccountRef, IdentifierKind, Platform};

const MOBILE_MIN_DIGITS: usize = 7;
const MOBILE_MAX_DIGITS: usize = 15;
const USERNAME_MAX_LEN: usize = 32;

/// Resolve a human identifier on a platform
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, raw: &str, platform: Platform) -> Result<AccountRef, ResolveError>;
}

/// Normalise an identifier for lookup
///
/// Returns `None` when the input can never match an account of this kind.
pub fn normalize(raw: &str, kind: IdentifierKind) -> Option<String> {
    let raw = raw.trim();
    match kind {
        IdentifierKind::Email => normalize_email(raw),
        IdentifierKind::Mobile => normalize_mobile(raw),
        IdentifierKind::Username => normalize_username(raw),
    }
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || email.chars().any(char::is_whitespace)
    {
        return None;
    }
    Some(email)
}

fn normalize_mobile(raw: &str) -> Option<String> {
    let (plus, rest) = match raw.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", raw),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }

    if !(MOBILE_MIN_DIGITS..=MOBILE_MAX_DIGITS).contains(&digits.len()) {
        return None;
    }
    Some(format!("{}{}", plus, digits))
}

fn normalize_username(raw: &str) -> Option<String> {
    let name = raw
        .strip_prefix('$')
        .or_else(|| raw.strip_prefix('@'))
        .unwrap_or(raw)
        .to_lowercase();
    if name.is_empty()
        || name.len() > USERNAME_MAX_LEN
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return None;
    }
    Some(name)
}

/// Resolver backed by an [`AccountDirectory`], using each platform's convention
pub struct DirectoryResolver {
    directory: Arc<dyn AccountDirectory>,
    call_timeout: Duration,
}

impl DirectoryResolver {
    pub fn new(directory: Arc<dyn AccountDirectory>, call_timeout: Duration) -> Self {
        Self {
            directory,
            call_timeout,
        }
    }
}

#[async_trait]
impl IdentityResolver for DirectoryResolver {
    async fn resolve(&self, raw: &str, platform: Platform) -> Result<AccountRef, ResolveError> {
        let kind = platform.identifier_kind();
        let Some(value) = normalize(raw, kind) else {
            debug!(platform = %platform, kind = %kind, "Identifier failed normalisation");
            return Err(ResolveError::NotFound(raw.trim().to_string()));
        };

        let lookup = self.directory.find_account(platform, kind, &value);
        match tokio::time::timeout(self.call_timeout, lookup).await {
            Ok(Ok(Some(account))) => Ok(account),
            Ok(Ok(None)) | Ok(Err(StoreError::NotFound(_))) => Err(ResolveError::NotFound(value)),
            Ok(Err(e)) => {
                warn!(platform = %platform, error = %e, "Identity lookup failed");
                Err(ResolveError::LookupUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(
                    platform = %platform,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Identity lookup timed out"
                );
                Err(ResolveError::LookupUnavailable(format!(
                    "lookup timed out after {}ms",
                    self.call_timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize("  Emmanuel.O@LampNets.com ", IdentifierKind::Email).as_deref(),
            Some("emmanuel.o@lampnets.com")
        );
        assert!(normalize("no-at-sign", IdentifierKind::Email).is_none());
        assert!(normalize("@domain.com", IdentifierKind::Email).is_none());
        assert!(normalize("a@b@c", IdentifierKind::Email).is_none());
        assert!(normalize("a b@c.com", IdentifierKind::Email).is_none());
    }

    #[test]
    fn test_normalize_mobile() {
        assert_eq!(
            normalize("+63 (917) 555-0101", IdentifierKind::Mobile).as_deref(),
            Some("+639175550101")
        );
        assert_eq!(
            normalize("0917.555.0101", IdentifierKind::Mobile).as_deref(),
            Some("09175550101")
        );
        assert!(normalize("12345", IdentifierKind::Mobile).is_none());
        assert!(normalize("0917-555-01O1", IdentifierKind::Mobile).is_none());
        assert!(normalize("++639175550101", IdentifierKind::Mobile).is_none());
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(
            normalize(" $JaneDoe ", IdentifierKind::Username).as_deref(),
            Some("janedoe")
        );
        assert_eq!(
            normalize("@jane_doe.2", IdentifierKind::Username).as_deref(),
            Some("jane_doe.2")
        );
        assert!(normalize("$", IdentifierKind::Username).is_none());
        assert!(normalize("jane doe", IdentifierKind::Username).is_none());
    }

    struct FixedDirectory {
        down: AtomicBool,
    }

    #[async_trait]
    impl AccountDirectory for FixedDirectory {
        async fn find_account(
            &self,
            platform: Platform,
            kind: IdentifierKind,
            value: &str,
        ) -> Result<Option<AccountRef>, StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("directory offline".into()));
            }
            Ok((kind == IdentifierKind::Email && value == "alice@example.com")
                .then(|| AccountRef::new("1", platform)))
        }
    }

    fn resolver(down: bool) -> DirectoryResolver {
        DirectoryResolver::new(
            Arc::new(FixedDirectory {
                down: AtomicBool::new(down),
            }),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_resolve_normalises_before_lookup() {
        let account = resolver(false)
            .resolve(" ALICE@example.com", Platform::PayPal)
            .await
            .unwrap();
        assert_eq!(account, AccountRef::new("1", Platform::PayPal));
    }

    #[tokio::test]
    async fn test_not_found_distinct_from_unavailable() {
        let err = resolver(false)
            .resolve("bob@example.com", Platform::PayPal)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));

        let err = resolver(true)
            .resolve("alice@example.com", Platform::PayPal)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::LookupUnavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_identifier_is_not_found_without_lookup() {
        // Directory is down, but a malformed identifier never reaches it
        let err = resolver(true)
            .resolve("not-an-email", Platform::PayPal)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
