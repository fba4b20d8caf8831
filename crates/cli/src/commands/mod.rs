//! Subcommand implementations.
//!
//! Every command prints its result to stdout as pretty JSON; progress and
//! failures go to the tracing log on stderr.

pub mod cart;
pub mod delivery;
pub mod lookup;

use gapa_checkout::CheckoutError;
use gapa_checkout::backend::BackendError;
use gapa_checkout::currency::CurrencyError;
use gapa_checkout::delivery::QuoteError;
use gapa_checkout::geocode::GeocodeError;
use gapa_checkout::storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),

    #[error("Geocoding error: {0}")]
    Geocode(#[from] GeocodeError),

    #[error("Currency error: {0}")]
    Currency(#[from] CurrencyError),

    #[error("Could not encode output: {0}")]
    Json(#[from] serde_json::Error),

    /// Arguments are valid for clap but not for the command.
    #[error("{0}")]
    InvalidInput(String),
}

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> Result<(), CommandError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
