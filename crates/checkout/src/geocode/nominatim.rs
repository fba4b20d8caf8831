//! `OpenStreetMap` Nominatim search, the keyless last resort.
//!
//! `LocationIQ` returns the same OSM payload shape, so the parsing helpers
//! here serve both providers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use super::{GeocodeError, GeocodeProvider, PlaceDetails, Prediction, get_json};
use crate::geolocation::Coordinates;

const NAME: &str = "nominatim";
const RESULT_LIMIT: &str = "5";

/// Nominatim provider.
#[derive(Clone)]
pub struct Nominatim {
    client: reqwest::Client,
    url: Url,
    country_codes: String,
}

impl Nominatim {
    #[must_use]
    pub fn new(client: reqwest::Client, url: Url, country_codes: &str) -> Self {
        Self {
            client,
            url,
            country_codes: country_codes.to_owned(),
        }
    }

    fn search_url(&self, query: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("format", "json")
            .append_pair("addressdetails", "1")
            .append_pair("countrycodes", &self.country_codes)
            .append_pair("limit", RESULT_LIMIT);
        url
    }
}

#[async_trait]
impl GeocodeProvider for Nominatim {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<Prediction>, GeocodeError> {
        let body = get_json(&self.client, NAME, self.search_url(query)).await?;
        Ok(osm_predictions(&body, NAME))
    }

    async fn details(&self, prediction: &Prediction) -> Result<PlaceDetails, GeocodeError> {
        Ok(osm_details(&prediction.raw))
    }
}

/// Text of a JSON string or number.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Predictions from an OSM search result array.
pub(super) fn osm_predictions(body: &Value, provider: &str) -> Vec<Prediction> {
    body.as_array()
        .into_iter()
        .flatten()
        .filter_map(|place| {
            Some(Prediction {
                description: text(place.get("display_name")?)?,
                place_id: text(place.get("place_id")?)?,
                raw: place.clone(),
                provider: provider.to_owned(),
            })
        })
        .collect()
}

/// Structured fields from an OSM place with `addressdetails`.
pub(super) fn osm_details(place: &Value) -> PlaceDetails {
    let address = place.get("address").unwrap_or(&Value::Null);
    let field = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| address.get(*k).and_then(text))
            .unwrap_or_default()
    };

    let street = [field(&["house_number"]), field(&["road", "name"])]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let coordinate = |key: &str| {
        place
            .get(key)
            .and_then(text)
            .and_then(|s| s.parse::<f64>().ok())
    };
    let coordinates = coordinate("lat")
        .zip(coordinate("lon"))
        .map(|(latitude, longitude)| Coordinates {
            latitude,
            longitude,
        });

    PlaceDetails {
        street,
        city: field(&["city", "town", "village", "suburb", "county"]),
        region: field(&["state"]).trim_end_matches(" State").to_owned(),
        postcode: field(&["postcode"]),
        country: field(&["country"]),
        coordinates,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn place() -> Value {
        json!({
            "place_id": 123_456,
            "display_name": "Allen Avenue, Ikeja, Lagos State, Nigeria",
            "lat": "6.6018",
            "lon": "3.3515",
            "address": {
                "road": "Allen Avenue",
                "town": "Ikeja",
                "state": "Lagos State",
                "postcode": "100271",
                "country": "Nigeria"
            }
        })
    }

    #[test]
    fn test_predictions_normalize_numeric_ids() {
        let predictions = osm_predictions(&json!([place(), { "bogus": true }]), NAME);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].place_id, "123456");
        assert_eq!(predictions[0].provider, "nominatim");
    }

    #[test]
    fn test_details_from_address() {
        let details = osm_details(&place());
        assert_eq!(details.street, "Allen Avenue");
        assert_eq!(details.city, "Ikeja");
        assert_eq!(details.region, "Lagos");
        assert_eq!(details.postcode, "100271");
        let coords = details.coordinates.unwrap();
        assert!((coords.latitude - 6.6018).abs() < f64::EPSILON);
    }

    #[test]
    fn test_search_url() {
        let nominatim = Nominatim::new(
            reqwest::Client::new(),
            Url::parse("https://nominatim.openstreetmap.org/search").unwrap(),
            "ng",
        );
        let url = nominatim.search_url("allen avenue");
        assert_eq!(
            url.query(),
            Some("q=allen+avenue&format=json&addressdetails=1&countrycodes=ng&limit=5")
        );
    }
}
