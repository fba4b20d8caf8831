//! Geocoding and currency commands.

use gapa_checkout::CheckoutConfig;
use gapa_checkout::currency::CurrencyConverter;
use gapa_checkout::geocode::{GeocodeCascade, MIN_QUERY_LEN};
use gapa_core::CurrencyCode;
use rust_decimal::Decimal;
use serde_json::json;

use super::{CommandError, print_json};

/// Run `query` through the provider cascade.
pub async fn geocode(config: &CheckoutConfig, query: &str, details: bool) -> Result<(), CommandError> {
    if query.trim().chars().count() < MIN_QUERY_LEN {
        return Err(CommandError::InvalidInput(format!(
            "query must be at least {MIN_QUERY_LEN} characters"
        )));
    }

    let cascade = GeocodeCascade::from_config(&config.geocoding)?;
    tracing::info!(providers = ?cascade.provider_names(), "Searching");
    let predictions = cascade.search(query).await;

    let resolved = match predictions.first() {
        Some(first) if details => Some(cascade.details(first).await?),
        _ => None,
    };
    print_json(&json!({ "predictions": predictions, "details": resolved }))
}

/// Convert `amount` between currencies at the latest rate.
pub async fn fx(
    config: &CheckoutConfig,
    amount: Decimal,
    from: &CurrencyCode,
    to: &CurrencyCode,
) -> Result<(), CommandError> {
    let converter = CurrencyConverter::new(config.exchange_rate_url.clone())?;
    let converted = converter.convert(amount, from, to).await?;
    print_json(&json!({
        "amount": amount,
        "from": from,
        "to": to,
        "converted": converted,
    }))
}
