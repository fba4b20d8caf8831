//! Payment dispatch.
//!
//! `pay` runs one attempt end to end: check the gateway is configured, load
//! its SDK, open the popup, report the payment to the backend and clear the
//! guest cart. A cancelled or failed attempt commits nothing, so the
//! customer can simply try again.

pub mod gateway;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gapa_core::{CurrencyCode, PaymentMethod, PaymentReference, UserId};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::backend::{BackendClient, BackendError, PaymentConfirmation};
use crate::config::PaymentConfig;
use crate::error::add_breadcrumb;
use crate::storage::PersistenceGateway;

pub use gateway::{CheckoutHost, GatewayRequest, PopupOutcome, SdkLoader, gateway_amount, script_url};

/// Path of the order confirmation page.
pub const ORDER_CONFIRMATION_PATH: &str = "/order-confirmation";

/// Errors that can occur during a payment attempt.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// No public key for the chosen gateway.
    #[error("{0} payment is not configured")]
    NotConfigured(PaymentMethod),

    /// The gateway script could not be loaded.
    #[error("failed to load the {method} SDK: {reason}")]
    SdkLoad {
        method: PaymentMethod,
        reason: String,
    },

    /// The customer closed the popup.
    #[error("{0} payment was cancelled")]
    Cancelled(PaymentMethod),

    /// The gateway declined or errored.
    #[error("{method} payment failed: {reason}")]
    Declined {
        method: PaymentMethod,
        reason: String,
    },

    /// Nothing to charge.
    #[error("order total must be positive, got {0}")]
    InvalidAmount(Decimal),

    /// Paid, but the backend did not record the order.
    #[error("payment {reference} could not be confirmed: {source}")]
    Confirmation {
        reference: String,
        #[source]
        source: BackendError,
    },
}

impl PaymentError {
    /// Whether this is an infrastructure failure worth an error report.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::SdkLoad { .. } | Self::Confirmation { .. })
    }

    /// Message safe to show the customer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured(method) => format!("Payment is not configured for {method}"),
            Self::SdkLoad { .. } => {
                "Couldn't load the payment window, please check your connection and try again"
                    .to_string()
            }
            Self::Cancelled(_) => "Payment was cancelled".to_string(),
            Self::Declined { .. } => "Payment was not completed, please try again".to_string(),
            Self::InvalidAmount(_) => "Your order total is not valid".to_string(),
            Self::Confirmation { reference, .. } => format!(
                "Your payment went through but we couldn't confirm your order. \
                 Please contact support with reference {reference}"
            ),
        }
    }
}

/// Records a paid order.
#[async_trait]
pub trait OrderConfirmer: Send + Sync {
    async fn confirm(&self, confirmation: &PaymentConfirmation) -> Result<(), BackendError>;
}

#[async_trait]
impl OrderConfirmer for BackendClient {
    async fn confirm(&self, confirmation: &PaymentConfirmation) -> Result<(), BackendError> {
        self.confirm_payment(confirmation).await
    }
}

/// Everything one payment attempt needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub method: PaymentMethod,
    /// Grand total in whole currency units.
    pub total: Decimal,
    pub shipping_cost: Decimal,
    pub full_address_string: String,
    pub user_id: Option<UserId>,
    pub pickup_location_id: Option<String>,
    pub email: String,
    pub customer_name: String,
    pub phone: String,
}

/// Where to send the customer after a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessRedirect {
    pub reference: PaymentReference,
    pub amount: Decimal,
}

impl SuccessRedirect {
    /// `?ref=…&amount=…`
    #[must_use]
    pub fn query_string(&self) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("ref", self.reference.as_str())
            .append_pair("amount", &self.amount.normalize().to_string())
            .finish();
        format!("?{query}")
    }

    /// Confirmation page path with the query string.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{ORDER_CONFIRMATION_PATH}{}", self.query_string())
    }
}

/// Runs payment attempts against the configured gateways.
pub struct PaymentDispatcher {
    host: Arc<dyn CheckoutHost>,
    confirmer: Arc<dyn OrderConfirmer>,
    store: PersistenceGateway,
    keys: PaymentConfig,
    currency: CurrencyCode,
    loader: SdkLoader,
}

impl PaymentDispatcher {
    #[must_use]
    pub fn new(
        host: Arc<dyn CheckoutHost>,
        confirmer: Arc<dyn OrderConfirmer>,
        store: PersistenceGateway,
        keys: PaymentConfig,
        currency: CurrencyCode,
    ) -> Self {
        Self {
            host,
            confirmer,
            store,
            keys,
            currency,
            loader: SdkLoader::new(),
        }
    }

    /// Charge the order and record it.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway is not configured, its SDK does not
    /// load, the customer cancels, the gateway declines, or the backend does
    /// not confirm the paid order.
    #[instrument(skip(self, order), fields(method = %order.method, total = %order.total))]
    pub async fn pay(&self, order: &OrderRequest) -> Result<SuccessRedirect, PaymentError> {
        let method = order.method;
        let public_key = self
            .keys
            .public_key(method)
            .ok_or(PaymentError::NotConfigured(method))?;
        if order.total <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(order.total));
        }

        self.loader
            .ensure(self.host.as_ref(), script_url(method))
            .await
            .map_err(|reason| PaymentError::SdkLoad { method, reason })?;

        let reference = PaymentReference::generate(method, Utc::now());
        let request = GatewayRequest {
            method,
            public_key: public_key.to_owned(),
            email: order.email.clone(),
            customer_name: order.customer_name.clone(),
            phone: order.phone.clone(),
            amount: gateway_amount(method, order.total),
            currency: self.currency.clone(),
            reference: reference.as_str().to_owned(),
        };
        add_breadcrumb(
            "payment",
            "Opening payment popup",
            &[("method", method.as_str()), ("reference", reference.as_str())],
        );

        let reference = match self.host.open_checkout(&request).await {
            PopupOutcome::Success { reference: reported } if !reported.trim().is_empty() => {
                PaymentReference::new(reported)
            }
            PopupOutcome::Success { .. } => reference,
            PopupOutcome::Closed => return Err(PaymentError::Cancelled(method)),
            PopupOutcome::Failed(reason) => return Err(PaymentError::Declined { method, reason }),
        };

        let confirmation = PaymentConfirmation {
            shipping_cost: order.shipping_cost,
            full_address_string: order.full_address_string.clone(),
            user_id: order.user_id.clone(),
            transaction_reference: reference.as_str().to_owned(),
            pickup_location_id: order.pickup_location_id.clone(),
        };
        self.confirmer
            .confirm(&confirmation)
            .await
            .map_err(|source| PaymentError::Confirmation {
                reference: reference.as_str().to_owned(),
                source,
            })?;

        // The order exists now; a stale guest cart must not undo that.
        if let Err(e) = self.store.clear_guest_cart() {
            tracing::warn!(error = %e, "Failed to clear guest cart after payment");
        }

        tracing::info!(reference = %reference, "Payment confirmed");
        Ok(SuccessRedirect {
            reference,
            amount: order.total,
        })
    }
}
