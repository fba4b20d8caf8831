//! Google Places Autocomplete and Place Details.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use super::{GeocodeError, GeocodeProvider, PlaceDetails, Prediction, get_json};
use crate::config::static_url;
use crate::geolocation::Coordinates;

const NAME: &str = "google";
const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place/";

/// Google Places provider.
#[derive(Clone)]
pub struct GooglePlaces {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: Url,
    components: String,
}

impl GooglePlaces {
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: SecretString, country_codes: &str) -> Self {
        Self {
            client,
            api_key,
            base_url: static_url(DEFAULT_BASE_URL),
            components: country_codes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| format!("country:{c}"))
                .collect::<Vec<_>>()
                .join("|"),
        }
    }

    /// Point at another Places API root (must end in `/`).
    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, GeocodeError> {
        let mut url = self.base_url.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("key", self.api_key.expose_secret());
        }
        Ok(url)
    }
}

/// Google reports errors in the body with a 200 status.
fn check_status(body: &Value) -> Result<(), GeocodeError> {
    match body.get("status").and_then(Value::as_str) {
        None | Some("OK" | "ZERO_RESULTS") => Ok(()),
        Some(status) => Err(GeocodeError::Api {
            provider: NAME,
            message: body
                .get("error_message")
                .and_then(Value::as_str)
                .map_or_else(|| status.to_owned(), |m| format!("{status}: {m}")),
        }),
    }
}

fn prediction_from(value: &Value) -> Option<Prediction> {
    Some(Prediction {
        description: value.get("description")?.as_str()?.to_owned(),
        place_id: value.get("place_id")?.as_str()?.to_owned(),
        raw: value.clone(),
        provider: NAME.to_owned(),
    })
}

/// Read `address_components` of a details result.
fn details_from(result: &Value) -> PlaceDetails {
    let component = |kind: &str| -> String {
        result
            .get("address_components")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|c| {
                c.get("types")
                    .and_then(Value::as_array)
                    .is_some_and(|types| types.iter().any(|t| t.as_str() == Some(kind)))
            })
            .and_then(|c| c.get("long_name").and_then(Value::as_str))
            .unwrap_or_default()
            .to_owned()
    };

    let street = [component("street_number"), component("route")]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let city = Some(component("locality"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| component("administrative_area_level_2"));
    let region = component("administrative_area_level_1")
        .trim_end_matches(" State")
        .to_owned();

    let location = result.pointer("/geometry/location");
    let coordinates = location.and_then(|loc| {
        Some(Coordinates {
            latitude: loc.get("lat")?.as_f64()?,
            longitude: loc.get("lng")?.as_f64()?,
        })
    });

    PlaceDetails {
        street,
        city,
        region,
        postcode: component("postal_code"),
        country: component("country"),
        coordinates,
    }
}

#[async_trait]
impl GeocodeProvider for GooglePlaces {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<Prediction>, GeocodeError> {
        let mut params = vec![("input", query)];
        if !self.components.is_empty() {
            params.push(("components", self.components.as_str()));
        }
        let body = get_json(&self.client, NAME, self.endpoint("autocomplete/json", &params)?).await?;
        check_status(&body)?;
        Ok(body
            .get("predictions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(prediction_from)
            .collect())
    }

    #[instrument(skip(self, prediction), fields(place_id = %prediction.place_id))]
    async fn details(&self, prediction: &Prediction) -> Result<PlaceDetails, GeocodeError> {
        let url = self.endpoint(
            "details/json",
            &[
                ("place_id", prediction.place_id.as_str()),
                ("fields", "address_component,geometry"),
            ],
        )?;
        let body = get_json(&self.client, NAME, url).await?;
        check_status(&body)?;
        Ok(body.get("result").map(details_from).unwrap_or_default())
    }
}
