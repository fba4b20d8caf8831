//! Cart and totals commands.

use std::sync::Arc;

use gapa_checkout::CheckoutConfig;
use gapa_checkout::backend::BackendClient;
use gapa_checkout::cart::{CartAggregator, CartOwner};
use gapa_checkout::notify::LogNotifier;
use gapa_checkout::storage::{FileStorage, PersistenceGateway};
use gapa_core::{CartLineItem, CheckoutTotals, ProductId, Quantity, UserId};
use rust_decimal::Decimal;
use serde_json::json;

use super::{CommandError, print_json};

/// Load a member's cart, or the guest cart persisted on this machine.
pub async fn show(config: &CheckoutConfig, user: Option<String>) -> Result<(), CommandError> {
    let backend = BackendClient::new(config)?;
    let store = PersistenceGateway::new(Arc::new(FileStorage::open(&config.storage_dir)?));
    let owner = user.map_or(CartOwner::Guest, |id| CartOwner::Member(UserId::new(id)));

    let mut cart = CartAggregator::new(Arc::new(backend), store, Arc::new(LogNotifier), owner);
    cart.load().await?;
    tracing::info!(lines = cart.lines().len(), "Cart loaded");

    // Delivery is unknown until an address is chosen.
    let totals = CheckoutTotals::compute(cart.lines(), Decimal::ZERO);
    print_json(&json!({ "lines": cart.lines(), "totals": totals }))
}

/// Totals for one line and a delivery price.
pub fn totals(price: Decimal, quantity: i64, delivery: Decimal) -> Result<(), CommandError> {
    if price.is_sign_negative() || delivery.is_sign_negative() {
        return Err(CommandError::InvalidInput(
            "price and delivery must not be negative".to_owned(),
        ));
    }
    let line = single_line(price, quantity, None);
    print_json(&CheckoutTotals::compute(&[line], delivery))
}

/// A synthetic cart line for commands that price a hypothetical order.
pub fn single_line(price: Decimal, quantity: i64, weight_kg: Option<Decimal>) -> CartLineItem {
    CartLineItem {
        product_id: ProductId::new("cli"),
        name: "CLI item".to_owned(),
        price,
        quantity: Quantity::clamped(quantity),
        image: None,
        weight_kg,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_clamps_quantity() {
        assert_eq!(single_line(Decimal::ONE, 0, None).quantity.get(), 1);
        assert_eq!(single_line(Decimal::ONE, 500, None).quantity.get(), 99);
    }

    #[test]
    fn test_totals_rejects_negative_delivery() {
        let err = totals(Decimal::from(100), 1, Decimal::from(-5)).unwrap_err();
        assert!(matches!(err, CommandError::InvalidInput(_)));
    }
}
