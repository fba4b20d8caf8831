//! Region, flat-rate and live-quote commands.

use std::sync::Arc;

use gapa_checkout::CheckoutConfig;
use gapa_checkout::backend::BackendClient;
use gapa_checkout::delivery::{Carrier, FlatRateResolver, GigClient, QuoteRequest};
use gapa_core::{Address, CartLineItem, RegionId};
use serde_json::json;

use super::{CommandError, print_json};

/// Where a live quote is delivered to.
#[derive(Debug, Clone)]
pub struct Destination {
    pub state: String,
    pub city: String,
    pub address: String,
}

fn flat_rate(config: &CheckoutConfig, backend: BackendClient) -> FlatRateResolver {
    FlatRateResolver::new(Arc::new(backend), config.flat_rate_regions.clone())
}

/// List regions, optionally only the flat-rate ones.
pub async fn regions(config: &CheckoutConfig, flat_rate_only: bool) -> Result<(), CommandError> {
    let backend = BackendClient::new(config)?;
    let mut regions = backend.get_regions().await?;
    if flat_rate_only {
        regions = flat_rate(config, backend).filter_regions(regions);
    }
    tracing::info!(count = regions.len(), "Regions loaded");
    print_json(&regions)
}

/// Show the flat-rate table for a region.
pub async fn rates(config: &CheckoutConfig, region_id: &str) -> Result<(), CommandError> {
    let backend = BackendClient::new(config)?;
    let quote = flat_rate(config, backend)
        .resolve(&RegionId::new(region_id))
        .await?;
    if quote.unavailable {
        tracing::warn!(region_id, "Region has no delivery locations");
    }
    print_json(&quote)
}

/// Ask GIG to price one line to `destination`.
pub async fn quote(
    config: &CheckoutConfig,
    destination: &Destination,
    line: CartLineItem,
) -> Result<(), CommandError> {
    let address = Address {
        region: destination.state.clone(),
        city: destination.city.clone(),
        address1: destination.address.clone(),
        ..Address::default()
    };
    let request = QuoteRequest::build(
        &[line],
        &address,
        None,
        config.gig.receiver_station_id,
        None,
    )
    .ok_or_else(|| CommandError::InvalidInput("a destination state is required".to_owned()))?;

    let carrier = GigClient::new(&config.gig)?;
    let amount = carrier.quote(&request).await?;
    tracing::info!(%amount, state = %request.destination_state, "GIG quote received");
    print_json(&json!({ "request": request, "amount": amount }))
}
