//! GAPA flat-rate delivery.
//!
//! Only a short allow-list of regions is served. Each region has a price
//! table of pickup/delivery locations; the customer pays the price of the
//! location they pick.

use std::sync::Arc;

use async_trait::async_trait;
use gapa_core::{DeliveryLocation, LocationId, Region, RegionId};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::backend::{BackendClient, BackendError};

/// Where price tables come from.
#[async_trait]
pub trait RateTableSource: Send + Sync {
    async fn price_table(&self, region_id: &RegionId) -> Result<Vec<DeliveryLocation>, BackendError>;
}

#[async_trait]
impl RateTableSource for BackendClient {
    async fn price_table(&self, region_id: &RegionId) -> Result<Vec<DeliveryLocation>, BackendError> {
        self.get_price_table(region_id).await
    }
}

/// Flat-rate quote for the chosen region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlatRateQuote {
    pub region_id: Option<RegionId>,
    pub locations: Vec<DeliveryLocation>,
    pub selected: Option<DeliveryLocation>,
    pub price: Decimal,
    pub loading: bool,
    /// The region's table is empty: nothing can be shipped there.
    pub unavailable: bool,
}

impl FlatRateQuote {
    /// Quote for a region whose table is being fetched.
    #[must_use]
    pub fn pending(region_id: RegionId) -> Self {
        Self {
            region_id: Some(region_id),
            loading: true,
            ..Self::default()
        }
    }

    /// Install a freshly fetched table.
    ///
    /// One location is selected automatically, several wait for the
    /// customer, none marks the region as unshippable.
    pub fn apply_table(&mut self, table: Vec<DeliveryLocation>) {
        self.loading = false;
        self.selected = None;
        self.price = Decimal::ZERO;
        self.unavailable = table.is_empty();
        if let [only] = table.as_slice() {
            self.price = only.price;
            self.selected = Some(only.clone());
        }
        self.locations = table;
    }

    /// Pick a location from the current table.
    ///
    /// Returns `false` and leaves the quote untouched if `id` is not in it.
    pub fn select(&mut self, id: &LocationId) -> bool {
        match self.locations.iter().find(|l| &l.id == id) {
            Some(location) => {
                self.price = location.price;
                self.selected = Some(location.clone());
                true
            }
            None => false,
        }
    }

    /// A positive price is settled and nothing is loading.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.loading && !self.unavailable && self.price > Decimal::ZERO
    }
}

/// Resolves flat-rate quotes for allowed regions.
#[derive(Clone)]
pub struct FlatRateResolver {
    source: Arc<dyn RateTableSource>,
    allowed_regions: Vec<String>,
}

impl FlatRateResolver {
    #[must_use]
    pub fn new(source: Arc<dyn RateTableSource>, allowed_regions: Vec<String>) -> Self {
        Self {
            source,
            allowed_regions,
        }
    }

    #[must_use]
    pub fn allowed_regions(&self) -> &[String] {
        &self.allowed_regions
    }

    /// Whether GAPA delivers to the region with this name.
    #[must_use]
    pub fn is_allowed(&self, region_name: &str) -> bool {
        let name = region_name.trim();
        self.allowed_regions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    /// Keep only the regions GAPA delivers to.
    #[must_use]
    pub fn filter_regions(&self, regions: Vec<Region>) -> Vec<Region> {
        regions
            .into_iter()
            .filter(|r| self.is_allowed(&r.name))
            .collect()
    }

    /// Fetch the region's table and derive a quote from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be fetched.
    #[instrument(skip(self))]
    pub async fn resolve(&self, region_id: &RegionId) -> Result<FlatRateQuote, BackendError> {
        let table = self.source.price_table(region_id).await?;
        let mut quote = FlatRateQuote::pending(region_id.clone());
        quote.apply_table(table);
        tracing::debug!(
            locations = quote.locations.len(),
            price = %quote.price,
            "Resolved flat-rate table"
        );
        Ok(quote)
    }
}
