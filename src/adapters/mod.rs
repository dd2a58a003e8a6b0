//! Device channel adapters
//!
//! This module defines the [`DeviceChannel`] trait, the low-level I/O abstraction
//! every bench device (brewer, scale, pump controller) is driven through, and its
//! two implementations:
//!
//! - [`SerialAdapter`] talks to real hardware through the `serialport` crate.
//! - [`MockAdapter`] replays scripted traffic for tests.
//!
//! Reads never block past the adapter's read timeout. "Nothing buffered yet" is an
//! ordinary result (`None` / empty string); only channel faults are errors.

pub mod mock_adapter;
pub mod serial_adapter;

pub use mock_adapter::{MockAdapter, MockLine};
pub use serial_adapter::{SerialAdapter, SerialAdapterBuilder};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Channel fault reported by an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter has not been connected.
    #[error("Adapter not connected")]
    NotConnected,

    /// The port could not be opened.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write failed.
    #[error("Channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The device held the line busy past the timeout.
    #[error("Channel timed out after {0:?}")]
    Timeout(Duration),

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Failure injected by a test double.
    #[error("Injected failure")]
    Injected,
}

/// Request/response link to one bench device.
#[async_trait]
pub trait DeviceChannel: Send {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Write one command. The adapter appends its line terminator.
    async fn send(&mut self, command: &str) -> Result<(), AdapterError>;

    /// Next complete line without its terminator, or `None` if no complete line is
    /// buffered. Partial input stays buffered for the next call.
    async fn read_line(&mut self) -> Result<Option<String>, AdapterError>;

    /// Everything currently buffered, decoded lossily. May be empty.
    async fn read_all(&mut self) -> Result<String, AdapterError>;
}

