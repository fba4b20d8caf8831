//! Payment gateway SDKs and the host that runs them.
//!
//! The inline checkout widgets of Paystack and Flutterwave run in the
//! customer's browser. The engine describes what to load and what to charge;
//! a [`CheckoutHost`] does the loading and shows the popup.

use std::collections::HashSet;

use async_trait::async_trait;
use gapa_core::{CurrencyCode, PaymentMethod, round_whole};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;

const PAYSTACK_SCRIPT_URL: &str = "https://js.paystack.co/v1/inline.js";
const FLUTTERWAVE_SCRIPT_URL: &str = "https://checkout.flutterwave.com/v3.js";

/// CDN script that provides the gateway's popup.
#[must_use]
pub const fn script_url(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Paystack => PAYSTACK_SCRIPT_URL,
        PaymentMethod::Flutterwave => FLUTTERWAVE_SCRIPT_URL,
    }
}

/// Convert a whole-currency amount to the units the gateway expects.
///
/// Paystack charges in minor units (kobo), Flutterwave in major units.
#[must_use]
pub fn gateway_amount(method: PaymentMethod, amount: Decimal) -> Decimal {
    match method {
        PaymentMethod::Paystack => round_whole(amount * Decimal::ONE_HUNDRED),
        PaymentMethod::Flutterwave => amount,
    }
}

/// What the popup is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub method: PaymentMethod,
    pub public_key: String,
    pub email: String,
    pub customer_name: String,
    pub phone: String,
    /// Amount in gateway units, see [`gateway_amount`].
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub reference: String,
}

/// How the popup ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupOutcome {
    /// Gateway callback with the transaction reference it reports.
    Success { reference: String },
    /// Customer closed the popup.
    Closed,
    /// Gateway reported a failure.
    Failed(String),
}

/// Browser-side capabilities the dispatcher needs.
#[async_trait]
pub trait CheckoutHost: Send + Sync {
    /// Inject and load a script.
    async fn load_script(&self, url: &str) -> Result<(), String>;

    /// Open the gateway popup and wait for it to finish.
    async fn open_checkout(&self, request: &GatewayRequest) -> PopupOutcome;
}

/// Loads each gateway script at most once.
#[derive(Debug, Default)]
pub struct SdkLoader {
    loaded: Mutex<HashSet<String>>,
}

impl SdkLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `url` through `host` unless an earlier call already did.
    ///
    /// Concurrent calls wait for the first; a failed load is retried by the
    /// next call.
    ///
    /// # Errors
    ///
    /// Returns the host's reason when the script cannot be loaded.
    pub async fn ensure(&self, host: &dyn CheckoutHost, url: &str) -> Result<(), String> {
        let mut loaded = self.loaded.lock().await;
        if loaded.contains(url) {
            return Ok(());
        }
        host.load_script(url).await?;
        tracing::debug!(url, "Payment SDK loaded");
        loaded.insert(url.to_owned());
        Ok(())
    }

    pub async fn is_loaded(&self, url: &str) -> bool {
        self.loaded.lock().await.contains(url)
    }
}
