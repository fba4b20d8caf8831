//! Core types for GAPA checkout.
//!
//! This module provides type-safe wrappers for the checkout domain.

pub mod address;
pub mod cart;
pub mod delivery;
pub mod id;
pub mod money;
pub mod payment;
pub mod step;

pub use address::{Address, AddressField};
pub use cart::{CartLineItem, GuestCart, GuestCartEntry, Quantity};
pub use delivery::{DeliveryLocation, DeliveryMethod, Region};
pub use id::*;
pub use money::{CheckoutTotals, CurrencyCode, CurrencyCodeError, VAT_RATE, round_whole};
pub use payment::{PaymentMethod, PaymentReference};
pub use step::CheckoutStep;
