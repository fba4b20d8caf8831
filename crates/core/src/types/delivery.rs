//! Delivery methods, regions and flat-rate locations.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{LocationId, RegionId};

/// Which delivery provider prices the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// GAPA's own flat-rate table, keyed by region.
    #[default]
    Gapa,
    /// Live quote from GIG Logistics.
    Gig,
}

impl DeliveryMethod {
    /// Human-readable label appended to the submitted address.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Gapa => "GAPA Delivery",
            Self::Gig => "GIG Logistics",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gapa => "gapa",
            Self::Gig => "gig",
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gapa" => Ok(Self::Gapa),
            "gig" => Ok(Self::Gig),
            other => Err(format!("unknown delivery method: {other}")),
        }
    }
}

/// A state the store ships to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
}

/// A named delivery point inside a region, with its flat price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLocation {
    pub id: LocationId,
    pub name: String,
    pub price: Decimal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_method_wire_names() {
        assert_eq!(serde_json::to_string(&DeliveryMethod::Gig).unwrap(), "\"gig\"");
        assert_eq!("GAPA".parse::<DeliveryMethod>().unwrap(), DeliveryMethod::Gapa);
        assert!("dhl".parse::<DeliveryMethod>().is_err());
    }
}
