//! Delivery rate resolution.
//!
//! Two strategies price an order:
//!
//! - [`flat_rate`] - GAPA's own table of pickup/delivery locations per region
//! - [`live_quote`] - GIG Logistics quotes, refetched as inputs change
//!
//! Exactly one is active at a time. [`DeliveryState`] carries the active
//! strategy with its own state, so switching methods drops the other's state
//! instead of leaving stale flags around.

pub mod flat_rate;
pub mod live_quote;

use std::sync::Arc;
use std::time::Duration;

use gapa_core::{Address, CartLineItem, DeliveryMethod, UserId};
use rust_decimal::Decimal;

use crate::geolocation::Coordinates;
use crate::notify::Notifier;

pub use flat_rate::{FlatRateQuote, FlatRateResolver, RateTableSource};
pub use live_quote::{Carrier, GigClient, LiveQuote, LiveQuoter, QuoteError, QuoteRequest};

/// The active delivery strategy and its state.
pub enum DeliveryState {
    Gapa(FlatRateQuote),
    Gig(LiveQuoter),
}

impl DeliveryState {
    #[must_use]
    pub const fn method(&self) -> DeliveryMethod {
        match self {
            Self::Gapa(_) => DeliveryMethod::Gapa,
            Self::Gig(_) => DeliveryMethod::Gig,
        }
    }

    /// Delivery price that goes into the totals.
    #[must_use]
    pub fn effective_price(&self) -> Decimal {
        match self {
            Self::Gapa(quote) => quote.price,
            Self::Gig(quoter) => quoter.current().amount,
        }
    }

    /// Whether the price is final: positive, not loading, not failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match self {
            Self::Gapa(quote) => quote.is_settled(),
            Self::Gig(quoter) => quoter.current().is_settled(),
        }
    }

    #[must_use]
    pub const fn flat_rate(&self) -> Option<&FlatRateQuote> {
        match self {
            Self::Gapa(quote) => Some(quote),
            Self::Gig(_) => None,
        }
    }

    pub const fn flat_rate_mut(&mut self) -> Option<&mut FlatRateQuote> {
        match self {
            Self::Gapa(quote) => Some(quote),
            Self::Gig(_) => None,
        }
    }

    #[must_use]
    pub const fn live(&self) -> Option<&LiveQuoter> {
        match self {
            Self::Gig(quoter) => Some(quoter),
            Self::Gapa(_) => None,
        }
    }
}

impl std::fmt::Debug for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gapa(quote) => f.debug_tuple("Gapa").field(quote).finish(),
            Self::Gig(quoter) => f.debug_tuple("Gig").field(&quoter.current()).finish(),
        }
    }
}

/// Builds delivery states for either method.
#[derive(Clone)]
pub struct DeliveryResolver {
    flat_rate: FlatRateResolver,
    carrier: Arc<dyn Carrier>,
    notifier: Arc<dyn Notifier>,
    debounce: Duration,
    station_id: u32,
}

impl DeliveryResolver {
    #[must_use]
    pub fn new(
        flat_rate: FlatRateResolver,
        carrier: Arc<dyn Carrier>,
        notifier: Arc<dyn Notifier>,
        debounce: Duration,
        station_id: u32,
    ) -> Self {
        Self {
            flat_rate,
            carrier,
            notifier,
            debounce,
            station_id,
        }
    }

    #[must_use]
    pub const fn flat_rate(&self) -> &FlatRateResolver {
        &self.flat_rate
    }

    /// A fresh state for `method`, with nothing resolved yet.
    #[must_use]
    pub fn fresh(&self, method: DeliveryMethod) -> DeliveryState {
        match method {
            DeliveryMethod::Gapa => DeliveryState::Gapa(FlatRateQuote::default()),
            DeliveryMethod::Gig => DeliveryState::Gig(LiveQuoter::new(
                Arc::clone(&self.carrier),
                Arc::clone(&self.notifier),
                self.debounce,
            )),
        }
    }

    /// Replace `state` with a fresh one for `method`.
    ///
    /// Returns `false` if `method` is already active.
    pub fn switch(&self, state: &mut DeliveryState, method: DeliveryMethod) -> bool {
        if state.method() == method {
            return false;
        }
        if let DeliveryState::Gig(quoter) = state {
            quoter.reset();
        }
        *state = self.fresh(method);
        true
    }

    /// Carrier request for the current inputs.
    #[must_use]
    pub fn quote_request(
        &self,
        lines: &[CartLineItem],
        address: &Address,
        coords: Option<Coordinates>,
        user_id: Option<&UserId>,
    ) -> Option<QuoteRequest> {
        QuoteRequest::build(lines, address, coords, self.station_id, user_id)
    }
}
