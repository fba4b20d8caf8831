//! Cart aggregation for members and guests.
//!
//! Members' carts live on the backend; guests' carts live in the persistence
//! gateway as `{product_id, quantity}` entries and are enriched with product
//! details on load. Every mutation reloads the whole cart afterwards instead
//! of patching the local list.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use gapa_core::{CartLineItem, GuestCart, ProductId, Quantity, UserId};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::instrument;

use crate::backend::{BackendClient, BackendError, rows};
use crate::error::{CheckoutError, Result};
use crate::notify::{Notifier, Toast};
use crate::storage::{PersistenceGateway, StorageKey};

/// Cart operations the backend must provide.
#[async_trait]
pub trait CartBackend: Send + Sync {
    /// Raw cart rows for a member.
    async fn cart_rows(&self, user_id: &UserId) -> std::result::Result<Vec<Value>, BackendError>;

    /// Raw product details.
    async fn product(&self, product_id: &ProductId) -> std::result::Result<Value, BackendError>;

    async fn add_item(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> std::result::Result<(), BackendError>;

    async fn remove_item(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> std::result::Result<(), BackendError>;

    /// Change the quantity of a product already in the cart.
    ///
    /// The backend has no quantity update, so the default removes the row
    /// and adds it back with the new quantity. Backends that gain a real
    /// update override this.
    async fn set_quantity(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> std::result::Result<(), BackendError> {
        self.remove_item(user_id, product_id).await?;
        self.add_item(user_id, product_id, quantity).await
    }
}

#[async_trait]
impl CartBackend for BackendClient {
    async fn cart_rows(&self, user_id: &UserId) -> std::result::Result<Vec<Value>, BackendError> {
        match self.get_cart_rows(user_id).await {
            // A member without a cart yet.
            Err(BackendError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn product(&self, product_id: &ProductId) -> std::result::Result<Value, BackendError> {
        self.get_product(product_id).await
    }

    async fn add_item(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> std::result::Result<(), BackendError> {
        self.add_to_cart(user_id, product_id, quantity).await
    }

    async fn remove_item(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> std::result::Result<(), BackendError> {
        self.remove_cart_item(user_id, product_id).await
    }
}

/// Whose cart is being shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    Member(UserId),
    Guest,
}

impl CartOwner {
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Member(id) => Some(id),
            Self::Guest => None,
        }
    }
}

/// Normalized cart with backend- or storage-consistent mutations.
pub struct CartAggregator {
    backend: Arc<dyn CartBackend>,
    store: PersistenceGateway,
    notifier: Arc<dyn Notifier>,
    owner: CartOwner,
    lines: Vec<CartLineItem>,
}

impl CartAggregator {
    #[must_use]
    pub fn new(
        backend: Arc<dyn CartBackend>,
        store: PersistenceGateway,
        notifier: Arc<dyn Notifier>,
        owner: CartOwner,
    ) -> Self {
        Self {
            backend,
            store,
            notifier,
            owner,
            lines: Vec::new(),
        }
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLineItem] {
        &self.lines
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub const fn owner(&self) -> &CartOwner {
        &self.owner
    }

    /// `Σ price × quantity` over the loaded lines.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLineItem::line_total).sum()
    }

    /// Switch owner (login/logout). Lines are stale until the next load.
    pub fn set_owner(&mut self, owner: CartOwner) {
        self.owner = owner;
    }

    /// Replace the lines with a fresh read of the owner's cart.
    ///
    /// On failure the previous lines are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the member cart or the guest cart cannot be read.
    /// Individual guest product lookups never fail the load.
    #[instrument(skip(self), fields(owner = ?self.owner))]
    pub async fn load(&mut self) -> Result<&[CartLineItem]> {
        let lines = match &self.owner {
            CartOwner::Member(user_id) => self
                .backend
                .cart_rows(user_id)
                .await?
                .iter()
                .filter_map(rows::line_from_row)
                .collect(),
            CartOwner::Guest => {
                let cart = self.store.guest_cart()?;
                self.enrich_guest_cart(&cart).await
            }
        };
        self.lines = lines;
        Ok(&self.lines)
    }

    /// Fetch product details for every guest entry in parallel.
    async fn enrich_guest_cart(&self, cart: &GuestCart) -> Vec<CartLineItem> {
        let fetches = cart.items.iter().map(|entry| async move {
            match self.backend.product(&entry.product_id).await {
                Ok(product) => {
                    rows::line_from_product(entry.product_id.clone(), &product, entry.quantity)
                }
                Err(e) => {
                    tracing::warn!(
                        product_id = %entry.product_id,
                        error = %e,
                        "Product lookup failed, showing placeholder line"
                    );
                    CartLineItem::unavailable(entry.product_id.clone(), entry.quantity)
                }
            }
        });
        join_all(fetches).await
    }

    /// Add one to a line's quantity (capped at 99).
    ///
    /// # Errors
    ///
    /// Returns the mutation error after it has been shown to the customer.
    pub async fn increment(&mut self, product_id: &ProductId) -> Result<()> {
        self.step_quantity(product_id, Quantity::increment).await
    }

    /// Take one from a line's quantity (floored at 1).
    ///
    /// # Errors
    ///
    /// Returns the mutation error after it has been shown to the customer.
    pub async fn decrement(&mut self, product_id: &ProductId) -> Result<()> {
        self.step_quantity(product_id, Quantity::decrement).await
    }

    async fn step_quantity(
        &mut self,
        product_id: &ProductId,
        step: fn(Quantity) -> Quantity,
    ) -> Result<()> {
        let current = match &self.owner {
            // Read the stored cart right before writing.
            CartOwner::Guest => self.store.guest_cart()?.quantity_of(product_id),
            CartOwner::Member(_) => self
                .lines
                .iter()
                .find(|l| &l.product_id == product_id)
                .map(|l| l.quantity),
        };
        let Some(current) = current else {
            return self
                .finish_mutation(Err(CheckoutError::InvalidState(
                    "That item is no longer in your cart".to_string(),
                )))
                .await;
        };
        let next = step(current);
        if next == current {
            return Ok(());
        }
        self.set_quantity(product_id, next).await
    }

    /// Set a line's quantity.
    ///
    /// # Errors
    ///
    /// Returns the mutation error after it has been shown to the customer.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity.get()))]
    pub async fn set_quantity(&mut self, product_id: &ProductId, quantity: Quantity) -> Result<()> {
        let outcome = match &self.owner {
            CartOwner::Member(user_id) => self
                .backend
                .set_quantity(user_id, product_id, quantity)
                .await
                .map_err(CheckoutError::from),
            CartOwner::Guest => self
                .store
                .update(StorageKey::GuestCart, |cart: &mut GuestCart| {
                    cart.set_quantity(product_id, quantity);
                })
                .map_err(CheckoutError::from),
        };
        self.finish_mutation(outcome).await
    }

    /// Add a product to the cart, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns the mutation error after it has been shown to the customer.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add(&mut self, product_id: &ProductId, quantity: Quantity) -> Result<()> {
        let outcome = match &self.owner {
            CartOwner::Member(user_id) => {
                let existing = self
                    .lines
                    .iter()
                    .find(|l| &l.product_id == product_id)
                    .map(|l| l.quantity);
                let written = match existing {
                    Some(current) => {
                        let merged = Quantity::new(current.get().saturating_add(quantity.get()));
                        self.backend.set_quantity(user_id, product_id, merged).await
                    }
                    None => self.backend.add_item(user_id, product_id, quantity).await,
                };
                written.map_err(CheckoutError::from)
            }
            CartOwner::Guest => self
                .store
                .update(StorageKey::GuestCart, |cart: &mut GuestCart| {
                    cart.add(product_id.clone(), quantity);
                })
                .map_err(CheckoutError::from),
        };
        self.finish_mutation(outcome).await
    }

    /// Remove a product from the cart.
    ///
    /// # Errors
    ///
    /// Returns the mutation error after it has been shown to the customer.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove(&mut self, product_id: &ProductId) -> Result<()> {
        let outcome = match &self.owner {
            CartOwner::Member(user_id) => self
                .backend
                .remove_item(user_id, product_id)
                .await
                .map_err(CheckoutError::from),
            CartOwner::Guest => self
                .store
                .update(StorageKey::GuestCart, |cart: &mut GuestCart| {
                    cart.remove(product_id);
                })
                .map_err(CheckoutError::from),
        };
        self.finish_mutation(outcome).await
    }

    /// Empty the guest cart after an order; members' carts are cleared by
    /// the backend when the order is confirmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest cart cannot be written.
    pub fn clear_after_order(&mut self) -> Result<()> {
        if self.owner == CartOwner::Guest {
            self.store.clear_guest_cart()?;
        }
        self.lines.clear();
        Ok(())
    }

    /// Surface a failed mutation, then reload regardless of the outcome.
    async fn finish_mutation(&mut self, outcome: Result<()>) -> Result<()> {
        if let Err(e) = &outcome {
            e.report();
            self.notifier.notify(Toast::error(e.user_message()));
        }
        if let Err(e) = self.load().await {
            e.report();
            self.notifier.notify(Toast::error(e.user_message()));
        }
        outcome
    }
}
