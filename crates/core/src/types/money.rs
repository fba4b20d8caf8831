//! Money arithmetic and checkout totals.
//!
//! Amounts are whole-currency `Decimal`s (naira, not kobo). Conversion to a
//! gateway's minor units happens at the payment boundary.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::cart::CartLineItem;

/// Value added tax rate applied to the cart subtotal (7.5%).
pub const VAT_RATE: Decimal = Decimal::from_parts(75, 0, 0, false, 3);

/// Round to a whole currency unit, halves away from zero.
#[must_use]
pub fn round_whole(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Totals derived from the cart and the effective delivery price.
///
/// Never stored: recompute from current state whenever it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckoutTotals {
    pub subtotal: Decimal,
    pub vat: Decimal,
    pub delivery: Decimal,
    pub total: Decimal,
}

impl CheckoutTotals {
    /// Derive totals from line items and a delivery price.
    #[must_use]
    pub fn compute(lines: &[CartLineItem], delivery: Decimal) -> Self {
        let subtotal: Decimal = lines.iter().map(CartLineItem::line_total).sum();
        let vat = round_whole(subtotal * VAT_RATE);
        Self {
            subtotal,
            vat,
            delivery,
            total: subtotal + vat + delivery,
        }
    }
}

/// Errors that can occur when parsing a [`CurrencyCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("currency code must be three ASCII letters, got {0:?}")]
pub struct CurrencyCodeError(pub String);

/// ISO 4217 currency code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse a currency code such as `"ngn"` or `"USD"`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is exactly three ASCII letters.
    pub fn parse(s: &str) -> Result<Self, CurrencyCodeError> {
        let trimmed = s.trim();
        if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(CurrencyCodeError(s.to_owned()))
        }
    }

    /// Nigerian naira, the store's base currency.
    #[must_use]
    pub fn ngn() -> Self {
        Self("NGN".to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::ngn()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = CurrencyCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = CurrencyCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
