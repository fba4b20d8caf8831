//! GAPA Core - Shared checkout domain types.
//!
//! This crate provides the types shared by every GAPA checkout component:
//! - `checkout` - Headless checkout engine (cart, delivery, payment)
//! - `cli` - Operator tool for probing the backend and third parties
//!
//! # Architecture
//!
//! The core crate contains only types and pure derivations - no I/O, no
//! HTTP clients, no storage. Totals, quantity clamping, guest cart edits and
//! step sequencing live here so they can be tested without a runtime.
//!
//! # Modules
//!
//! - [`types`] - Ids, money and totals, cart lines, addresses, delivery,
//!   checkout steps and payment references

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
