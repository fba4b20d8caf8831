//! Display currency conversion.
//!
//! Orders are always charged in the store currency; conversion only feeds
//! the "approximately" figure shown next to the totals. Rates come from
//! open.er-api.com and are cached for an hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gapa_core::CurrencyCode;
use moka::future::Cache;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::backend::rows;

type RateTable = Arc<HashMap<String, Decimal>>;

/// Errors that can occur when converting currencies.
#[derive(Debug, Error)]
pub enum CurrencyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate service returned an error.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// No rate for the requested currency.
    #[error("no exchange rate from {from} to {to}")]
    Unsupported { from: CurrencyCode, to: CurrencyCode },

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Cached exchange-rate lookups.
///
/// Cheaply cloneable; clones share the HTTP connection pool and cache.
#[derive(Clone)]
pub struct CurrencyConverter {
    inner: Arc<CurrencyConverterInner>,
}

struct CurrencyConverterInner {
    client: reqwest::Client,
    base_url: Url,
    rates: Cache<CurrencyCode, RateTable>,
}

impl CurrencyConverter {
    /// Create a converter against a latest-rates endpoint ending in `/`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(base_url: Url) -> Result<Self, CurrencyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let rates = Cache::builder()
            .max_capacity(20)
            .time_to_live(Duration::from_secs(3600)) // 1 hour
            .build();

        Ok(Self {
            inner: Arc::new(CurrencyConverterInner {
                client,
                base_url,
                rates,
            }),
        })
    }

    /// Rates from `base` to every currency the service knows.
    ///
    /// # Errors
    ///
    /// Returns an error if the rate service cannot be reached or refuses.
    #[instrument(skip(self), fields(base = %base))]
    pub async fn rates(&self, base: &CurrencyCode) -> Result<RateTable, CurrencyError> {
        if let Some(rates) = self.inner.rates.get(base).await {
            debug!("Cache hit for exchange rates");
            return Ok(rates);
        }

        let url = self.inner.base_url.join(base.as_str())?;
        let response = self.inner.client.get(url).send().await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() || body.get("result").and_then(Value::as_str) == Some("error") {
            let message = body
                .get("error-type")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned();
            tracing::warn!(status = %status, message = %message, "Exchange rate lookup failed");
            return Err(CurrencyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let rates: RateTable = Arc::new(rates_from(&body));
        self.inner.rates.insert(base.clone(), Arc::clone(&rates)).await;
        Ok(rates)
    }

    /// Convert `amount` from one currency to another, to two decimals.
    ///
    /// # Errors
    ///
    /// Returns an error if the rates cannot be fetched or `to` is unknown.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Result<Decimal, CurrencyError> {
        if from == to {
            return Ok(amount);
        }
        let rates = self.rates(from).await?;
        let rate = rates
            .get(to.as_str())
            .ok_or_else(|| CurrencyError::Unsupported {
                from: from.clone(),
                to: to.clone(),
            })?;
        Ok((amount * rate).round_dp(2))
    }
}

fn rates_from(body: &Value) -> HashMap<String, Decimal> {
    body.get("rates")
        .and_then(Value::as_object)
        .map(|rates| {
            rates
                .iter()
                .filter_map(|(code, rate)| Some((code.to_ascii_uppercase(), rows::parse_decimal(rate)?)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_rates_from_body() {
        let body = json!({
            "result": "success",
            "base_code": "NGN",
            "rates": { "NGN": 1, "USD": 0.00065, "GBP": "0.0005", "XXX": null }
        });
        let rates = rates_from(&body);
        assert_eq!(rates.len(), 3);
        assert_eq!(rates["USD"], Decimal::new(65, 5));
    }

    #[tokio::test]
    async fn test_same_currency_skips_lookup() {
        // Unroutable base URL: any request would fail.
        let converter = CurrencyConverter::new(Url::parse("http://127.0.0.1:1/").unwrap()).unwrap();
        let amount = Decimal::from(87_500);
        assert_eq!(
            converter
                .convert(amount, &CurrencyCode::ngn(), &CurrencyCode::ngn())
                .await
                .unwrap(),
            amount
        );
    }
}
