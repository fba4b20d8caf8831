//! Address autocomplete.
//!
//! # Architecture
//!
//! - Providers are tried in order (Google Places, `LocationIQ`, Nominatim);
//!   the first non-empty answer wins and later providers are not called
//! - A provider that errors is logged and skipped, never surfaced
//! - Providers without an API key are left out of the cascade entirely
//! - [`SuggestionFeed`] numbers every lookup; an answer that arrives after a
//!   newer lookup started is discarded

pub mod google;
pub mod locationiq;
pub mod nominatim;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gapa_core::Address;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::GeocodingConfig;
use crate::geolocation::Coordinates;

pub use google::GooglePlaces;
pub use locationiq::LocationIq;
pub use nominatim::Nominatim;

/// Shortest query worth sending to a provider.
pub const MIN_QUERY_LEN: usize = 3;

/// Provider name used for suggestions drawn from recent addresses.
pub const RECENT_PROVIDER: &str = "recent";

/// Errors that can occur during address lookup.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned a non-success status or an error payload.
    #[error("{provider} error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No provider can resolve this prediction.
    #[error("no provider named {0:?}")]
    UnknownProvider(String),
}

/// A normalized autocomplete suggestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub description: String,
    pub place_id: String,
    /// Provider payload, kept for structured resolution.
    pub raw: Value,
    /// Name of the provider that produced it.
    pub provider: String,
}

/// Structured fields resolved from a prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaceDetails {
    pub street: String,
    pub city: String,
    pub region: String,
    pub postcode: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
}

impl PlaceDetails {
    /// Copy the resolved fields into `address`, leaving blanks alone.
    ///
    /// The region name is replaced only when the provider knows one, and a
    /// replaced region drops its id so it is picked again from the list.
    pub fn apply_to(&self, address: &mut Address) {
        fn put(slot: &mut String, value: &str) {
            if !value.trim().is_empty() {
                value.trim().clone_into(slot);
            }
        }
        put(&mut address.address1, &self.street);
        put(&mut address.city, &self.city);
        put(&mut address.postcode, &self.postcode);
        put(&mut address.country, &self.country);
        if !self.region.trim().is_empty() && !self.region.trim().eq_ignore_ascii_case(&address.region) {
            address.clear_region();
            self.region.trim().clone_into(&mut address.region);
        }
    }
}

/// An autocomplete backend.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Suggestions for a partial address.
    async fn search(&self, query: &str) -> Result<Vec<Prediction>, GeocodeError>;

    /// Structured fields for one of this provider's predictions.
    async fn details(&self, prediction: &Prediction) -> Result<PlaceDetails, GeocodeError>;
}

/// Shared HTTP client for providers.
pub(crate) fn http_client() -> Result<reqwest::Client, GeocodeError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("gapa-checkout/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// GET `url` and parse the JSON body, mapping error statuses.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    provider: &'static str,
    url: Url,
) -> Result<Value, GeocodeError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(GeocodeError::Api {
            provider,
            message: format!("{status}: {}", body.chars().take(200).collect::<String>()),
        });
    }

    serde_json::from_str(&body).map_err(|e| GeocodeError::Api {
        provider,
        message: format!("unreadable response: {e}"),
    })
}

/// Ordered list of providers, queried until one has answers.
#[derive(Clone, Default)]
pub struct GeocodeCascade {
    providers: Vec<Arc<dyn GeocodeProvider>>,
}

impl GeocodeCascade {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn GeocodeProvider>>) -> Self {
        Self { providers }
    }

    /// Cascade from configuration, skipping providers without a key.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn from_config(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let client = http_client()?;
        let mut providers: Vec<Arc<dyn GeocodeProvider>> = Vec::new();

        if let Some(key) = &config.google_api_key {
            providers.push(Arc::new(GooglePlaces::new(
                client.clone(),
                key.clone(),
                &config.country_codes,
            )));
        }
        if let Some(key) = &config.locationiq_api_key {
            providers.push(Arc::new(LocationIq::new(
                client.clone(),
                key.clone(),
                &config.country_codes,
            )));
        }
        providers.push(Arc::new(Nominatim::new(
            client,
            config.nominatim_url.clone(),
            &config.country_codes,
        )));

        tracing::debug!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Geocoding cascade configured"
        );
        Ok(Self { providers })
    }

    /// Names of the providers, in query order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Query providers in order and return the first non-empty answer.
    ///
    /// Provider failures fall through to the next provider; if none has an
    /// answer the result is empty.
    pub async fn search(&self, query: &str) -> Vec<Prediction> {
        for provider in &self.providers {
            match provider.search(query).await {
                Ok(predictions) if !predictions.is_empty() => {
                    tracing::debug!(
                        provider = provider.name(),
                        count = predictions.len(),
                        "Geocoding answered"
                    );
                    return predictions;
                }
                Ok(_) => {
                    tracing::debug!(provider = provider.name(), "Geocoding returned nothing");
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Geocoding provider failed");
                }
            }
        }
        Vec::new()
    }

    /// Structured fields for a prediction, from the provider that made it.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unknown or its lookup fails.
    pub async fn details(&self, prediction: &Prediction) -> Result<PlaceDetails, GeocodeError> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == prediction.provider)
            .ok_or_else(|| GeocodeError::UnknownProvider(prediction.provider.clone()))?;
        provider.details(prediction).await
    }
}

/// Autocomplete suggestions for an address input.
///
/// Cheaply cloneable; clones share the lookup counter.
#[derive(Clone)]
pub struct SuggestionFeed {
    cascade: Arc<GeocodeCascade>,
    generation: Arc<AtomicU64>,
}

impl SuggestionFeed {
    #[must_use]
    pub fn new(cascade: Arc<GeocodeCascade>) -> Self {
        Self {
            cascade,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn cascade(&self) -> &GeocodeCascade {
        &self.cascade
    }

    /// Suggestions for `query`, recent addresses first.
    ///
    /// Returns `None` if a newer lookup started while this one was waiting;
    /// the caller should keep what it shows. A query shorter than
    /// [`MIN_QUERY_LEN`] yields no suggestions and cancels older lookups.
    pub async fn suggest(&self, query: &str, recent: &[String]) -> Option<Vec<Prediction>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Some(Vec::new());
        }

        let needle = query.to_lowercase();
        let mut suggestions: Vec<Prediction> = recent
            .iter()
            .filter(|addr| addr.to_lowercase().contains(&needle))
            .enumerate()
            .map(|(i, addr)| Prediction {
                description: addr.clone(),
                place_id: format!("{RECENT_PROVIDER}:{i}"),
                raw: Value::Null,
                provider: RECENT_PROVIDER.to_owned(),
            })
            .collect();

        let remote = self.cascade.search(query).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(query, "Discarding stale suggestions");
            return None;
        }

        for prediction in remote {
            if !suggestions
                .iter()
                .any(|s| s.description.eq_ignore_ascii_case(&prediction.description))
            {
                suggestions.push(prediction);
            }
        }
        Some(suggestions)
    }
}
