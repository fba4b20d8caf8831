//! Payment methods and transaction references.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment gateway chosen on the Payment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Paystack,
    Flutterwave,
}

impl PaymentMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paystack => "paystack",
            Self::Flutterwave => "flutterwave",
        }
    }

    /// Prefix of the transaction references this gateway generates.
    #[must_use]
    pub const fn reference_prefix(self) -> &'static str {
        match self {
            Self::Paystack => "GAPA_PSK",
            Self::Flutterwave => "GAPA_FLW",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paystack" => Ok(Self::Paystack),
            "flutterwave" => Ok(Self::Flutterwave),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Transaction reference handed to the gateway, `PREFIX_<millis>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Generate a reference for `method` stamped with `at`.
    #[must_use]
    pub fn generate(method: PaymentMethod, at: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", method.reference_prefix(), at.timestamp_millis()))
    }

    /// Wrap a reference reported back by a gateway.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
