//! Device location for live delivery quotes.
//!
//! Coordinates are optional everywhere: a denied permission, an error or a
//! timeout all read as "no coordinates" and the quote is requested without
//! them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Why the device could not report a position.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,

    #[error("position unavailable: {0}")]
    Unavailable(String),
}

/// Host-supplied access to the device position.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

/// A source that never has a position, for hosts without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

#[async_trait]
impl LocationSource for NoLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable("no location source".to_owned()))
    }
}

/// A source pinned to one position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationSource for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

/// Ask `source` for a position, giving up after `timeout`.
pub async fn locate(source: &dyn LocationSource, timeout: Duration) -> Option<Coordinates> {
    match tokio::time::timeout(timeout, source.current_position()).await {
        Ok(Ok(coords)) => Some(coords),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Device location unavailable");
            None
        }
        Err(_) => {
            tracing::debug!(timeout_secs = timeout.as_secs(), "Device location timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    #[async_trait]
    impl LocationSource for Never {
        async fn current_position(&self) -> Result<Coordinates, LocationError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_times_out_to_none() {
        assert_eq!(locate(&Never, Duration::from_secs(8)).await, None);
    }

    #[tokio::test]
    async fn test_locate_denied_is_none() {
        assert_eq!(locate(&NoLocation, Duration::from_secs(8)).await, None);
    }

    #[tokio::test]
    async fn test_locate_fixed() {
        let here = Coordinates {
            latitude: 6.5244,
            longitude: 3.3792,
        };
        assert_eq!(
            locate(&FixedLocation(here), Duration::from_secs(8)).await,
            Some(here)
        );
    }
}
