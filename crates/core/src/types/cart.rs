//! Cart line items and the guest cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Quantity of a single cart line, clamped to `1..=99`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Quantity(u8);

impl Quantity {
    /// Smallest quantity a line may hold.
    pub const MIN: u8 = 1;
    /// Largest quantity a line may hold.
    pub const MAX: u8 = 99;

    /// Create a quantity, clamping into range.
    #[must_use]
    pub const fn new(n: u8) -> Self {
        if n < Self::MIN {
            Self(Self::MIN)
        } else if n > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(n)
        }
    }

    /// Create a quantity from an untrusted wide integer, clamping into range.
    #[must_use]
    pub fn clamped(n: i64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped first
        Self(n.clamp(i64::from(Self::MIN), i64::from(Self::MAX)) as u8)
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// One more, saturating at [`Self::MAX`].
    #[must_use]
    pub const fn increment(self) -> Self {
        Self::new(self.0.saturating_add(1))
    }

    /// One less, saturating at [`Self::MIN`].
    #[must_use]
    pub const fn decrement(self) -> Self {
        Self::new(self.0.saturating_sub(1))
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl From<i64> for Quantity {
    fn from(n: i64) -> Self {
        Self::clamped(n)
    }
}

impl From<Quantity> for u8 {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

/// A normalized cart line, whatever cart it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub product_id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub quantity: Quantity,
    pub image: Option<String>,
    /// Unit weight, when the catalog records one.
    #[serde(default)]
    pub weight_kg: Option<Decimal>,
}

impl CartLineItem {
    /// Placeholder for a line whose product details could not be fetched.
    #[must_use]
    pub fn unavailable(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            name: "Unavailable product".to_owned(),
            price: Decimal::ZERO,
            quantity,
            image: None,
            weight_kg: None,
        }
    }

    /// `price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity.get())
    }
}

/// A guest cart entry as persisted in local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCartEntry {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// Cart of an unauthenticated visitor, persisted as `{"items": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCart {
    #[serde(default)]
    pub items: Vec<GuestCartEntry>,
}

impl GuestCart {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn quantity_of(&self, product_id: &ProductId) -> Option<Quantity> {
        self.items
            .iter()
            .find(|e| &e.product_id == product_id)
            .map(|e| e.quantity)
    }

    /// Add `quantity` of a product, merging with an existing entry.
    pub fn add(&mut self, product_id: ProductId, quantity: Quantity) {
        if let Some(entry) = self.items.iter_mut().find(|e| e.product_id == product_id) {
            entry.quantity = Quantity::new(entry.quantity.get().saturating_add(quantity.get()));
        } else {
            self.items.push(GuestCartEntry {
                product_id,
                quantity,
            });
        }
    }

    /// Overwrite the quantity of an existing entry.
    ///
    /// Returns `false` if the product is not in the cart.
    pub fn set_quantity(&mut self, product_id: &ProductId, quantity: Quantity) -> bool {
        match self.items.iter_mut().find(|e| &e.product_id == product_id) {
            Some(entry) => {
                entry.quantity = quantity;
                true
            }
            None => false,
        }
    }

    /// Remove a product. Returns `false` if it was not present.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|e| &e.product_id != product_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
