//! Unified error handling with Sentry integration.
//!
//! Provides a unified `CheckoutError` type for every user-initiated action.
//! Hosts show [`CheckoutError::user_message`] as a toast; infrastructure
//! failures are captured to Sentry by [`CheckoutError::report`] first.

use thiserror::Error;

use crate::backend::BackendError;
use crate::currency::CurrencyError;
use crate::delivery::QuoteError;
use crate::geocode::GeocodeError;
use crate::payment::PaymentError;
use crate::storage::StorageError;

/// Application-level error type for checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// GAPA backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Persisted state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Delivery quote could not be obtained.
    #[error("Delivery quote error: {0}")]
    Quote(#[from] QuoteError),

    /// Address lookup failed.
    #[error("Geocoding error: {0}")]
    Geocode(#[from] GeocodeError),

    /// Payment did not complete.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Exchange rates unavailable.
    #[error("Currency error: {0}")]
    Currency(#[from] CurrencyError),

    /// The action is not allowed in the current checkout state.
    #[error("Invalid action: {0}")]
    InvalidState(String),
}

impl CheckoutError {
    /// Whether this is an infrastructure failure worth an error report.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        match self {
            Self::Backend(_) | Self::Storage(_) | Self::Currency(_) => true,
            Self::Payment(err) => err.is_infrastructure(),
            Self::Quote(_) | Self::Geocode(_) | Self::InvalidState(_) => false,
        }
    }

    /// Message safe to show the customer.
    #[must_use]
    pub fn user_message(&self) -> String {
        // Don't expose internal error details to customers
        match self {
            Self::Backend(BackendError::RateLimited(_)) => {
                "Too many requests, please try again shortly".to_string()
            }
            Self::Backend(_) => "Something went wrong, please try again".to_string(),
            Self::Storage(_) => "Could not save your checkout details".to_string(),
            Self::Quote(err) => err.user_message().to_string(),
            Self::Geocode(_) => "Address lookup is unavailable, please type your address".to_string(),
            Self::Payment(err) => err.user_message(),
            Self::Currency(_) => "Currency conversion is unavailable".to_string(),
            Self::InvalidState(msg) => msg.clone(),
        }
    }

    /// Log the error, capturing infrastructure failures to Sentry.
    pub fn report(&self) {
        if self.is_infrastructure() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Checkout error"
            );
        } else {
            tracing::warn!(error = %self, "Checkout action failed");
        }
    }
}

/// Result type alias for `CheckoutError`.
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a checkout action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of steps
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}
