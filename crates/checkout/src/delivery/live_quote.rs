//! GIG Logistics live delivery quotes.
//!
//! Quotes are re-requested whenever an input changes while GIG is the active
//! method. Requests are debounced and tagged with a generation number; a
//! response that is not for the latest generation is dropped, so the shared
//! state only ever shows the newest answer.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gapa_core::{Address, CartLineItem, UserId};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;
use url::Url;

use crate::backend::rows;
use crate::config::GigConfig;
use crate::geolocation::Coordinates;
use crate::notify::{Notifier, Toast};

/// Weight assumed per unit when the catalog has none.
const FALLBACK_UNIT_WEIGHT_KG: Decimal = Decimal::ONE;

/// Errors that can occur while quoting a delivery.
#[derive(Debug, Error)]
pub enum QuoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Carrier returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Carrier answered without a usable amount.
    #[error("no delivery rate for this destination")]
    NoRate,
}

impl QuoteError {
    /// Message safe to show the customer.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::NoRate => "We can't ship to this location",
            Self::Http(_) | Self::Api { .. } => "Couldn't get a delivery quote, please try again",
        }
    }
}

/// One cart line as the carrier sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteItem {
    pub name: String,
    pub quantity: u8,
    #[serde(with = "rust_decimal::serde::float")]
    pub weight_kg: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
}

/// Body of a carrier price request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteRequest {
    pub destination_state: String,
    pub destination_city: String,
    pub receiver_address: String,
    pub receiver_name: String,
    pub receiver_phone: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub weight_kg: Decimal,
    pub items_count: u32,
    pub items: Vec<QuoteItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_longitude: Option<f64>,
    #[serde(with = "rust_decimal::serde::float")]
    pub declared_value: Decimal,
    pub receiver_station_id: u32,
    pub destination_service_centre_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl QuoteRequest {
    /// Build a request from the current checkout inputs.
    ///
    /// Returns `None` while there is nothing to quote: an empty cart or no
    /// region yet.
    #[must_use]
    pub fn build(
        lines: &[CartLineItem],
        address: &Address,
        coords: Option<Coordinates>,
        station_id: u32,
        user_id: Option<&UserId>,
    ) -> Option<Self> {
        if lines.is_empty() || address.region.trim().is_empty() {
            return None;
        }

        let items: Vec<QuoteItem> = lines
            .iter()
            .map(|line| {
                let units = Decimal::from(line.quantity.get());
                QuoteItem {
                    name: line.name.clone(),
                    quantity: line.quantity.get(),
                    weight_kg: line.weight_kg.unwrap_or(FALLBACK_UNIT_WEIGHT_KG) * units,
                    value: line.line_total(),
                }
            })
            .collect();

        let city = if address.city.trim().is_empty() {
            address.region.trim()
        } else {
            address.city.trim()
        };

        Some(Self {
            destination_state: address.region.trim().to_owned(),
            destination_city: city.to_owned(),
            receiver_address: address.street_line(),
            receiver_name: address.full_name.trim().to_owned(),
            receiver_phone: address.phone.trim().to_owned(),
            weight_kg: items.iter().map(|i| i.weight_kg).sum(),
            items_count: items.iter().map(|i| u32::from(i.quantity)).sum(),
            declared_value: items.iter().map(|i| i.value).sum(),
            items,
            receiver_latitude: coords.map(|c| c.latitude),
            receiver_longitude: coords.map(|c| c.longitude),
            receiver_station_id: station_id,
            destination_service_centre_id: station_id,
            user_id: user_id.cloned(),
        })
    }
}

/// A carrier that prices deliveries.
#[async_trait]
pub trait Carrier: Send + Sync {
    /// Price of delivering `request`, in whole currency units.
    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError>;
}

/// Client for the GIG Logistics price endpoint.
#[derive(Clone)]
pub struct GigClient {
    client: reqwest::Client,
    url: Url,
    token: Option<SecretString>,
}

impl GigClient {
    /// Create a new GIG client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &GigConfig) -> Result<Self, QuoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            url: config.quote_url.clone(),
            token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl Carrier for GigClient {
    #[instrument(skip(self, request), fields(state = %request.destination_state))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError> {
        let mut builder = self.client.post(self.url.clone()).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "GIG quote returned non-success status"
            );
            return Err(QuoteError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        amount_from(&value)
            .filter(|amount| *amount > Decimal::ZERO)
            .ok_or(QuoteError::NoRate)
    }
}

fn amount_from(body: &Value) -> Option<Decimal> {
    ["/amount", "/data/amount", "/Object/DeliveryPrice"]
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .find_map(rows::parse_decimal)
}

/// Shared state of the live quote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveQuote {
    pub amount: Decimal,
    pub loading: bool,
    pub error: Option<String>,
}

impl LiveQuote {
    /// A positive amount is settled and nothing is in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.loading && self.error.is_none() && self.amount > Decimal::ZERO
    }
}

struct LiveQuoterInner {
    carrier: Arc<dyn Carrier>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<LiveQuote>,
    generation: AtomicU64,
    latest: Mutex<Option<QuoteRequest>>,
}

impl LiveQuoterInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn request(&self, generation: u64, request: &QuoteRequest) -> Result<Decimal, QuoteError> {
        let result = self
            .carrier
            .quote(request)
            .await
            .and_then(|amount| {
                if amount > Decimal::ZERO {
                    Ok(amount)
                } else {
                    Err(QuoteError::NoRate)
                }
            });

        if !self.is_current(generation) {
            tracing::debug!(generation, "Discarding stale delivery quote");
            return result;
        }

        match &result {
            Ok(amount) => {
                self.state.send_replace(LiveQuote {
                    amount: *amount,
                    loading: false,
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Delivery quote failed");
                self.notifier.notify(Toast::error(e.user_message()));
                self.state.send_replace(LiveQuote {
                    amount: Decimal::ZERO,
                    loading: false,
                    error: Some(e.user_message().to_owned()),
                });
            }
        }
        result
    }
}

/// Debounced live quote with a watchable state.
///
/// Clones share the same state and in-flight request.
#[derive(Clone)]
pub struct LiveQuoter {
    inner: Arc<LiveQuoterInner>,
    debounce: Duration,
}

impl LiveQuoter {
    #[must_use]
    pub fn new(carrier: Arc<dyn Carrier>, notifier: Arc<dyn Notifier>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(LiveQuote::default());
        Self {
            inner: Arc::new(LiveQuoterInner {
                carrier,
                notifier,
                state,
                generation: AtomicU64::new(0),
                latest: Mutex::new(None),
            }),
            debounce,
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> LiveQuote {
        self.inner.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LiveQuote> {
        self.inner.state.subscribe()
    }

    /// Invalidate anything in flight and return to the initial state.
    pub fn reset(&self) {
        self.remember(None);
        self.inner.next_generation();
        self.inner.state.send_replace(LiveQuote::default());
    }

    /// Re-quote after the debounce delay.
    ///
    /// The state turns `loading` at once and stays so until the newest
    /// request settles. `None` means the inputs are incomplete: the state is
    /// reset and nothing is sent.
    pub fn schedule(&self, request: Option<QuoteRequest>) -> Option<JoinHandle<()>> {
        let Some(request) = request else {
            self.reset();
            return None;
        };
        self.remember(Some(request.clone()));

        let generation = self.inner.next_generation();
        self.inner.state.send_modify(|quote| {
            quote.loading = true;
            quote.error = None;
        });

        let inner = Arc::clone(&self.inner);
        let debounce = self.debounce;
        Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if !inner.is_current(generation) {
                return;
            }
            // Failures are already toasted and stored in the state.
            let _ = inner.request(generation, &request).await;
        }))
    }

    /// Re-send the newest scheduled request with receiver coordinates.
    ///
    /// Does nothing if nothing is scheduled or the request already carries
    /// coordinates.
    pub fn requote_at(&self, coords: Coordinates) -> Option<JoinHandle<()>> {
        let mut request = self
            .inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        if request.receiver_latitude.is_some() {
            return None;
        }
        request.receiver_latitude = Some(coords.latitude);
        request.receiver_longitude = Some(coords.longitude);
        self.schedule(Some(request))
    }

    fn remember(&self, request: Option<QuoteRequest>) {
        *self
            .inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = request;
    }

    /// Quote immediately, without the debounce delay.
    ///
    /// # Errors
    ///
    /// Returns the carrier failure, which is also stored in the state.
    pub async fn quote_now(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError> {
        let generation = self.inner.next_generation();
        self.inner.state.send_modify(|quote| {
            quote.loading = true;
            quote.error = None;
        });
        self.inner.request(generation, request).await
    }
}
