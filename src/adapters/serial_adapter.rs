//! Serial device channel
//!
//! Line-oriented RS-232/USB-serial link for the brewer, scale and pump. Without
//! the `instrument_serial` feature the adapter still builds, but opening it and
//! every channel operation report the feature as disabled.

use crate::adapters::{AdapterError, DeviceChannel};
use crate::config::LinkConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Builder for [`SerialAdapter`]
///
/// Defaults:
/// * timeout: 50 ms
/// * line_terminator: "\r\n"
pub struct SerialAdapterBuilder {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
}

impl SerialAdapterBuilder {
    /// Create a new builder with required parameters
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(50),
            line_terminator: "\r\n".to_string(),
        }
    }

    /// Set the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the terminator appended to commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Build an unconnected adapter
    pub fn build(self) -> SerialAdapter {
        SerialAdapter {
            port_name: self.port_name,
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            line_terminator: self.line_terminator,
            pending: Vec::new(),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }
}

/// Serial adapter for RS-232/USB-serial bench devices
///
/// Wraps the `serialport` crate. Blocking port I/O runs on Tokio's blocking pool;
/// reads only ever take the bytes the driver already holds, so a silent device
/// costs one short round trip rather than a stalled loop.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Read timeout
    timeout: Duration,

    /// Line terminator for commands (e.g., "\r\n")
    line_terminator: String,

    /// Bytes received but not yet handed out as a complete line
    pending: Vec<u8>,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create an unconnected adapter with default settings
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        SerialAdapterBuilder::new(port_name, baud_rate).build()
    }

    /// Build and connect an adapter from a configured link.
    pub fn open(link: &LinkConfig) -> AppResult<Self> {
        #[cfg(feature = "instrument_serial")]
        {
            let mut adapter = SerialAdapterBuilder::new(link.port.clone(), link.baud_rate)
                .with_timeout(link.timeout)
                .with_line_terminator(link.line_terminator.clone())
                .build();
            adapter.connect()?;
            Ok(adapter)
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = link;
            Err(crate::error::BenchError::SerialFeatureDisabled)
        }
    }

    /// Whether the port is open
    pub fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }

    /// Open the serial port
    #[cfg(feature = "instrument_serial")]
    pub fn connect(&mut self) -> Result<(), AdapterError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| {
                AdapterError::ConnectionFailed(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    self.port_name, self.baud_rate, e
                ))
            })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            port = %self.port_name,
            baud_rate = self.baud_rate,
            "Serial port opened"
        );
        Ok(())
    }

    /// Pull whatever the driver holds into `pending`.
    #[cfg(feature = "instrument_serial")]
    async fn fill(&mut self) -> Result<(), AdapterError> {
        let port = self.port.as_ref().ok_or(AdapterError::NotConnected)?.clone();

        let chunk = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, AdapterError> {
            use std::io::Read;

            let mut port_guard = port.blocking_lock();
            let available = port_guard
                .bytes_to_read()
                .map_err(|e| AdapterError::Io(e.into()))? as usize;
            if available == 0 {
                return Ok(Vec::new());
            }

            let mut buffer = vec![0u8; available];
            match port_guard.read(&mut buffer) {
                Ok(n) => {
                    buffer.truncate(n);
                    Ok(buffer)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(AdapterError::Io(e)),
            }
        })
        .await
        .map_err(|e| AdapterError::ConnectionFailed(format!("Serial I/O task panicked: {}", e)))??;

        self.pending.extend_from_slice(&chunk);
        Ok(())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn fill(&mut self) -> Result<(), AdapterError> {
        Err(AdapterError::SerialFeatureDisabled)
    }
}

/// Split the first `\n`-terminated line off `pending`, dropping a trailing `\r`.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

#[async_trait]
impl DeviceChannel for SerialAdapter {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn send(&mut self, command: &str) -> Result<(), AdapterError> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port.as_ref().ok_or(AdapterError::NotConnected)?.clone();
            let command_str = format!("{}{}", command, self.line_terminator);

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> Result<(), AdapterError> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard.write_all(command_str.as_bytes())?;
                port_guard.flush()?;
                Ok(())
            })
            .await
            .map_err(|e| {
                AdapterError::ConnectionFailed(format!("Serial I/O task panicked: {}", e))
            })??;

            debug!(port = %self.port_name, command = command.trim(), "Sent serial command");
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(AdapterError::SerialFeatureDisabled)
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>, AdapterError> {
        if let Some(line) = take_line(&mut self.pending) {
            return Ok(Some(line));
        }
        self.fill().await?;
        Ok(take_line(&mut self.pending))
    }

    async fn read_all(&mut self) -> Result<String, AdapterError> {
        self.fill().await?;
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(text)
    }
}
