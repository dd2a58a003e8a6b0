//! Custom error types for the bench.
//!
//! This module defines the primary error type, `BenchError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration issues to a
//! scale that stops answering halfway through a drain.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or the environment overrides.
//! - **`Configuration`**: Semantic errors in the configuration that pass parsing but are
//!   logically incorrect (e.g. an interlock whose off threshold is above its on threshold).
//! - **`Io`**, **`Csv`**, **`Json`**: Persistence failures for run files and test plans.
//! - **`Adapter`**: Channel faults reported by a [`crate::adapters::DeviceChannel`].
//!   An empty read is *not* an error; only faults end up here.
//! - **`ScaleUnresponsive`**, **`DrainTimeout`**, **`StabilityTimeout`**: Device timeout
//!   conditions. These are the only errors that abort a run in progress.
//! - **`AcquisitionStalled`**: The acquisition worker did not observe its stop signal
//!   within the join budget.
//!
//! By using `#[from]`, `BenchError` can be created from the underlying error types,
//! keeping the `?` operator usable throughout the crate.

use crate::adapters::AdapterError;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, BenchError>;

/// Errors produced by the bench.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read or write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fault reported by a device channel.
    #[error("Device channel error: {0}")]
    Adapter(#[from] AdapterError),

    /// General instrument failure.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// A command template could not be rendered.
    #[error("Command format error: {0}")]
    CommandFormat(String),

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// The scale returned no data across a re-poll.
    #[error("Scale failed to respond")]
    ScaleUnresponsive,

    /// The scale never emptied within the drain budget.
    #[error("Drain did not complete within {0:?}")]
    DrainTimeout(Duration),

    /// The scale never reported a stable reading.
    #[error("Scale did not settle within {0:?}")]
    StabilityTimeout(Duration),

    /// The acquisition worker ignored its stop signal.
    #[error("Acquisition worker did not stop within {0:?}")]
    AcquisitionStalled(Duration),

    /// The acquisition collaborator failed.
    #[error("Acquisition error: {0}")]
    Acquisition(String),
}

impl From<figment::Error> for BenchError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl BenchError {
    /// True for the device timeout conditions that must abort the current run.
    pub fn is_device_timeout(&self) -> bool {
        matches!(
            self,
            Self::ScaleUnresponsive | Self::DrainTimeout(_) | Self::StabilityTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BenchError::Instrument("brewer reset failed".to_string());
        assert_eq!(err.to_string(), "Instrument error: brewer reset failed");
    }

    #[test]
    fn test_device_timeouts_are_classified() {
        assert!(BenchError::ScaleUnresponsive.is_device_timeout());
        assert!(BenchError::DrainTimeout(Duration::from_secs(240)).is_device_timeout());
        assert!(!BenchError::Adapter(AdapterError::NotConnected).is_device_timeout());
    }
}
