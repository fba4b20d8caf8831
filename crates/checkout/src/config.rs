//! Checkout configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables are optional; defaults target production endpoints.
//!
//! - `GAPA_API_BASE_URL` - GAPA backend (default: `https://stockmgt.gapaautoparts.com/api`)
//! - `GAPA_STORAGE_DIR` - Directory for persisted checkout state (default: `.gapa`)
//! - `GAPA_CURRENCY` - Charge currency (default: `NGN`)
//! - `GAPA_FLAT_RATE_REGIONS` - Comma-separated regions served by GAPA delivery
//!   (default: `Lagos,Abuja`)
//! - `GIG_QUOTE_URL` - GIG Logistics price endpoint
//! - `GIG_API_TOKEN` - Bearer token for the GIG endpoint
//! - `GIG_RECEIVER_STATION_ID` - Static receiver station id (default: 4)
//! - `GIG_QUOTE_DEBOUNCE_MS` - Quote refetch debounce (default: 400)
//! - `GEOLOCATION_TIMEOUT_SECS` - Device location timeout (default: 8)
//! - `PAYSTACK_PUBLIC_KEY` - Paystack inline public key
//! - `FLUTTERWAVE_PUBLIC_KEY` - Flutterwave checkout public key
//! - `GOOGLE_PLACES_API_KEY` - Google Places key (provider skipped when unset)
//! - `LOCATIONIQ_API_KEY` - `LocationIQ` key (provider skipped when unset)
//! - `NOMINATIM_URL` - Nominatim search endpoint
//! - `EXCHANGE_RATE_URL` - open.er-api.com latest-rates endpoint
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use gapa_core::{CurrencyCode, PaymentMethod};
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "https://stockmgt.gapaautoparts.com/api/";
const DEFAULT_GIG_QUOTE_URL: &str =
    "https://giglthirdpartyapi.azurewebsites.net/api/thirdparty/price";
const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const DEFAULT_EXCHANGE_RATE_URL: &str = "https://open.er-api.com/v6/latest/";
const DEFAULT_FLAT_RATE_REGIONS: &str = "Lagos,Abuja";

/// Station id used for every GIG quote. The carrier's station lookup
/// endpoints are unavailable, so this stays a configured constant.
pub const DEFAULT_RECEIVER_STATION_ID: u32 = 4;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Checkout engine configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// GAPA backend base URL (always ends with `/`)
    pub api_base_url: Url,
    /// Directory holding persisted checkout state
    pub storage_dir: PathBuf,
    /// Currency orders are charged in
    pub currency: CurrencyCode,
    /// Regions selectable under GAPA flat-rate delivery
    pub flat_rate_regions: Vec<String>,
    /// GIG Logistics quote configuration
    pub gig: GigConfig,
    /// Payment gateway keys
    pub payment: PaymentConfig,
    /// Address autocomplete providers
    pub geocoding: GeocodingConfig,
    /// Latest-rates endpoint for currency conversion
    pub exchange_rate_url: Url,
    /// Debounce and timeout settings
    pub timing: TimingConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// GIG Logistics quote configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct GigConfig {
    pub quote_url: Url,
    pub api_token: Option<SecretString>,
    pub receiver_station_id: u32,
}

impl std::fmt::Debug for GigConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GigConfig")
            .field("quote_url", &self.quote_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("receiver_station_id", &self.receiver_station_id)
            .finish()
    }
}

/// Payment gateway public keys. These are published to the browser and are
/// not secrets, but an absent key disables the gateway.
#[derive(Debug, Clone, Default)]
pub struct PaymentConfig {
    pub paystack_public_key: Option<String>,
    pub flutterwave_public_key: Option<String>,
}

impl PaymentConfig {
    /// Public key of `method`'s gateway, if one is configured.
    #[must_use]
    pub fn public_key(&self, method: PaymentMethod) -> Option<&str> {
        match method {
            PaymentMethod::Paystack => self.paystack_public_key.as_deref(),
            PaymentMethod::Flutterwave => self.flutterwave_public_key.as_deref(),
        }
        .map(str::trim)
        .filter(|key| !key.is_empty())
    }
}

/// Address autocomplete provider configuration.
///
/// Implements `Debug` manually to redact API keys.
#[derive(Clone)]
pub struct GeocodingConfig {
    pub google_api_key: Option<SecretString>,
    pub locationiq_api_key: Option<SecretString>,
    pub nominatim_url: Url,
    /// ISO country codes results are restricted to
    pub country_codes: String,
}

impl std::fmt::Debug for GeocodingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodingConfig")
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "locationiq_api_key",
                &self.locationiq_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("nominatim_url", &self.nominatim_url.as_str())
            .field("country_codes", &self.country_codes)
            .finish()
    }
}

/// Debounce and timeout settings.
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub quote_debounce: Duration,
    pub geolocation_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quote_debounce: Duration::from_millis(400),
            geolocation_timeout: Duration::from_secs(8),
        }
    }
}

impl CheckoutConfig {
    /// Configuration pointing at `api_base_url` with every other setting at
    /// its default.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url: with_trailing_slash(api_base_url),
            storage_dir: PathBuf::from(".gapa"),
            currency: CurrencyCode::ngn(),
            flat_rate_regions: parse_list(DEFAULT_FLAT_RATE_REGIONS),
            gig: GigConfig {
                quote_url: static_url(DEFAULT_GIG_QUOTE_URL),
                api_token: None,
                receiver_station_id: DEFAULT_RECEIVER_STATION_ID,
            },
            payment: PaymentConfig::default(),
            geocoding: GeocodingConfig {
                google_api_key: None,
                locationiq_api_key: None,
                nominatim_url: static_url(DEFAULT_NOMINATIM_URL),
                country_codes: "ng".to_owned(),
            },
            exchange_rate_url: static_url(DEFAULT_EXCHANGE_RATE_URL),
            timing: TimingConfig::default(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let mut config = Self::new(parse_env("GAPA_API_BASE_URL", DEFAULT_API_BASE_URL)?);
        config.storage_dir = PathBuf::from(get_env_or_default("GAPA_STORAGE_DIR", ".gapa"));
        config.currency = parse_env("GAPA_CURRENCY", "NGN")?;
        config.flat_rate_regions = parse_list(&get_env_or_default(
            "GAPA_FLAT_RATE_REGIONS",
            DEFAULT_FLAT_RATE_REGIONS,
        ));

        config.gig = GigConfig {
            quote_url: parse_env("GIG_QUOTE_URL", DEFAULT_GIG_QUOTE_URL)?,
            api_token: get_optional_secret("GIG_API_TOKEN"),
            receiver_station_id: parse_env(
                "GIG_RECEIVER_STATION_ID",
                &DEFAULT_RECEIVER_STATION_ID.to_string(),
            )?,
        };

        config.payment = PaymentConfig {
            paystack_public_key: get_optional_env("PAYSTACK_PUBLIC_KEY"),
            flutterwave_public_key: get_optional_env("FLUTTERWAVE_PUBLIC_KEY"),
        };

        config.geocoding = GeocodingConfig {
            google_api_key: get_optional_secret("GOOGLE_PLACES_API_KEY"),
            locationiq_api_key: get_optional_secret("LOCATIONIQ_API_KEY"),
            nominatim_url: parse_env("NOMINATIM_URL", DEFAULT_NOMINATIM_URL)?,
            country_codes: get_env_or_default("GEOCODE_COUNTRY_CODES", "ng"),
        };

        config.exchange_rate_url = with_trailing_slash(parse_env(
            "EXCHANGE_RATE_URL",
            DEFAULT_EXCHANGE_RATE_URL,
        )?);

        config.timing = TimingConfig {
            quote_debounce: Duration::from_millis(parse_env("GIG_QUOTE_DEBOUNCE_MS", "400")?),
            geolocation_timeout: Duration::from_secs(parse_env("GEOLOCATION_TIMEOUT_SECS", "8")?),
        };

        config.sentry_dsn = get_optional_env("SENTRY_DSN");
        config.sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional environment variable, treating blank as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an optional environment variable as a secret.
fn get_optional_secret(key: &str) -> Option<SecretString> {
    get_optional_env(key).map(SecretString::from)
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// `Url::join` treats the last segment as a file unless the path ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[allow(clippy::expect_used)] // only called with URL literals
pub(crate) fn static_url(raw: &str) -> Url {
    Url::parse(raw).expect("default URL literals are valid")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config() -> CheckoutConfig {
        CheckoutConfig::new(Url::parse("http://127.0.0.1:9000/api").unwrap())
    }

    #[test]
    fn test_new_normalizes_base_url() {
        assert_eq!(config().api_base_url.as_str(), "http://127.0.0.1:9000/api/");
        assert_eq!(
            config().api_base_url.join("cart/add").unwrap().as_str(),
            "http://127.0.0.1:9000/api/cart/add"
        );
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.gig.receiver_station_id, DEFAULT_RECEIVER_STATION_ID);
        assert_eq!(config.timing.quote_debounce, Duration::from_millis(400));
        assert_eq!(config.timing.geolocation_timeout, Duration::from_secs(8));
        assert_eq!(config.flat_rate_regions, vec!["Lagos", "Abuja"]);
        assert_eq!(config.currency.as_str(), "NGN");
    }

    #[test]
    fn test_parse_list_drops_blanks() {
        assert_eq!(parse_list("A, ,B,"), vec!["A", "B"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = config();
        config.gig.api_token = Some(SecretString::from("gig_live_token_value"));
        config.geocoding.google_api_key = Some(SecretString::from("google_key_value"));

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("gig_live_token_value"));
        assert!(!debug_output.contains("google_key_value"));
    }
}
