//! `LocationIQ` autocomplete.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;
use url::Url;

use super::nominatim::{osm_details, osm_predictions};
use super::{GeocodeError, GeocodeProvider, PlaceDetails, Prediction, get_json};
use crate::config::static_url;

const NAME: &str = "locationiq";
const DEFAULT_URL: &str = "https://api.locationiq.com/v1/autocomplete";

/// `LocationIQ` provider.
#[derive(Clone)]
pub struct LocationIq {
    client: reqwest::Client,
    api_key: SecretString,
    url: Url,
    country_codes: String,
}

impl LocationIq {
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: SecretString, country_codes: &str) -> Self {
        Self {
            client,
            api_key,
            url: static_url(DEFAULT_URL),
            country_codes: country_codes.to_owned(),
        }
    }

    /// Point at another autocomplete endpoint.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    fn search_url(&self, query: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret())
            .append_pair("q", query)
            .append_pair("countrycodes", &self.country_codes)
            .append_pair("limit", "5")
            .append_pair("format", "json");
        url
    }
}

#[async_trait]
impl GeocodeProvider for LocationIq {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<Prediction>, GeocodeError> {
        let body = match get_json(&self.client, NAME, self.search_url(query)).await {
            // "Unable to geocode" comes back as a 404.
            Err(GeocodeError::Api { message, .. }) if message.starts_with("404") => {
                return Ok(Vec::new());
            }
            other => other?,
        };
        Ok(osm_predictions(&body, NAME))
    }

    async fn details(&self, prediction: &Prediction) -> Result<PlaceDetails, GeocodeError> {
        Ok(osm_details(&prediction.raw))
    }
}
