//! Money Module
//!
//! Currency amounts are `rust_decimal::Decimal` values with two fractional
//! digits (the wallet backends store balances as `decimal(10,2)`).
//! Every amount that enters the ledger goes through this module first.
//!
//! ## Rules
//! 1. No silent rounding: more than [`CURRENCY_DECIMALS`] fractional digits is rejected
//! 2. Transfer amounts are strictly positive; adjustment deltas are non-zero
//! 3. Nothing above [`MAX_AMOUNT`] is accepted
//!
//! ```rust
//! use wallet_ledger::money::{format_amount, parse_amount};
//!
//! let amount = parse_amount("40.5").unwrap();
//! assert_eq!(format_amount(amount), "40.50");
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fractional digits carried by every balance and amount
pub const CURRENCY_DECIMALS: u32 = 2;

/// Largest amount a single balance column can hold (99,999,999.99)
/// (mantissa 9_999_999_999 = 2 * 2^32 + 1_410_065_407, scale 2)
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Money parsing and validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    NotPositive,

    #[error("Amount must not be zero")]
    Zero,

    #[error("Amount exceeds maximum of {}", MAX_AMOUNT)]
    TooLarge,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Parse a client-entered amount string into a validated positive amount
///
/// Strict: no sign, no exponent, no thousands separators, and both sides of
/// a decimal point must be present ("0.5", never ".5" or "5.").
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') {
        return Err(MoneyError::NotPositive);
    }

    let (whole, frac) = split_digits(amount_str)?;

    if frac.len() > CURRENCY_DECIMALS as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: CURRENCY_DECIMALS,
        });
    }

    // Too many integer digits can only ever exceed MAX_AMOUNT
    if whole.trim_start_matches('0').len() > 8 {
        return Err(MoneyError::TooLarge);
    }

    let digits = format!("{}{}", whole, frac);
    let mantissa: i64 = digits
        .parse()
        .map_err(|_| MoneyError::InvalidFormat(format!("not a number: {}", amount_str)))?;

    validate_amount(Decimal::new(mantissa, frac.len() as u32))
}

/// Parse a signed adjustment delta ("-25.00", "10")
pub fn parse_delta(delta_str: &str) -> Result<Decimal, MoneyError> {
    let delta_str = delta_str.trim();
    match delta_str.strip_prefix('-') {
        Some(rest) => parse_amount(rest).map(|d| -d),
        None => parse_amount(delta_str),
    }
}

fn split_digits(s: &str) -> Result<(&str, &str), MoneyError> {
    let mut parts = s.split('.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    if parts.next().is_some() {
        return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
    }

    if whole.is_empty() {
        return Err(MoneyError::InvalidFormat(
            "missing leading zero (e.g., use 0.5 instead of .5)".into(),
        ));
    }
    if frac == Some("") {
        return Err(MoneyError::InvalidFormat(
            "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
        ));
    }

    let frac = frac.unwrap_or_default();
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
    {
        return Err(MoneyError::InvalidFormat(format!(
            "only digits and one '.' allowed: {}",
            s
        )));
    }

    Ok((whole, frac))
}

/// Validate a transfer/deposit amount already held as a Decimal
///
/// Returns the amount rescaled to exactly [`CURRENCY_DECIMALS`].
pub fn validate_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount.is_zero() {
        return Err(MoneyError::Zero);
    }
    if amount.is_sign_negative() {
        return Err(MoneyError::NotPositive);
    }
    to_currency_scale(amount)
}

/// Validate an adjustment delta (either sign, never zero)
pub fn validate_delta(delta: Decimal) -> Result<Decimal, MoneyError> {
    if delta.is_zero() {
        return Err(MoneyError::Zero);
    }
    let magnitude = validate_amount(delta.abs())?;
    Ok(if delta.is_sign_negative() {
        -magnitude
    } else {
        magnitude
    })
}

fn to_currency_scale(amount: Decimal) -> Result<Decimal, MoneyError> {
    // Trailing zeros beyond the currency scale are harmless ("1.2300")
    let normalized = amount.normalize();
    if normalized.scale() > CURRENCY_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: CURRENCY_DECIMALS,
        });
    }
    if normalized > MAX_AMOUNT {
        return Err(MoneyError::TooLarge);
    }

    let mut scaled = normalized;
    scaled.rescale(CURRENCY_DECIMALS);
    Ok(scaled)
}

/// Render an amount with exactly two decimals
pub fn format_amount(value: Decimal) -> String {
    format!("{:.prec$}", value, prec = CURRENCY_DECIMALS as usize)
}
