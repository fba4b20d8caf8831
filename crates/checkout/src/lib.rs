//! GAPA headless checkout engine.
//!
//! Everything the storefront's checkout page does short of drawing it: the
//! cart, the wizard, delivery pricing, address lookup and payment. Browser
//! capabilities (script loading, the payment popup, device location, toasts)
//! are supplied by the host through traits.
//!
//! # Modules
//!
//! - [`session`] - A customer's checkout, wiring the pieces below together
//! - [`cart`] - Member and guest carts behind one aggregator
//! - [`steps`] - Wizard navigation and its gates
//! - [`delivery`] - GAPA flat-rate tables and GIG live quotes
//! - [`payment`] - Paystack and Flutterwave dispatch
//! - [`geocode`] - Address autocomplete cascade
//! - [`backend`] - GAPA REST client
//! - [`storage`] - Persisted drafts and the guest cart

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod cart;
pub mod config;
pub mod currency;
pub mod delivery;
pub mod error;
pub mod geocode;
pub mod geolocation;
pub mod notify;
pub mod payment;
pub mod session;
pub mod steps;
pub mod storage;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result};
pub use session::{CheckoutSession, SessionParts, SessionUser};
