//! Brewer controller driver
//!
//! Sends the brew, reset, debug, bloom and cool-down commands and hands telemetry
//! lines back to the session. The command wording comes from
//! [`crate::config::BrewerCommands`].

use super::render_command;
use crate::adapters::{AdapterError, DeviceChannel};
use crate::config::BrewerCommands;
use crate::error::AppResult;
use tracing::{debug, info};

/// Brewer controller on a device channel
pub struct Brewer {
    channel: Box<dyn DeviceChannel>,
    commands: BrewerCommands,
}

impl Brewer {
    /// Wrap a connected channel
    pub fn new(channel: Box<dyn DeviceChannel>, commands: BrewerCommands) -> Self {
        Self { channel, commands }
    }

    async fn send(&mut self, command: String) -> AppResult<()> {
        debug!(channel = self.channel.name(), %command, "brewer command");
        self.channel.send(&command).await?;
        Ok(())
    }

    /// Start a brew
    pub async fn brew(&mut self, temperature: f64, size: f64, flow_rate: f64) -> AppResult<()> {
        let command = render_command(
            &self.commands.brew,
            &[
                ("temperature", temperature),
                ("size", size),
                ("flow_rate", flow_rate),
            ],
        )?;
        info!(temperature, size, flow_rate, "Starting brew");
        self.send(command).await
    }

    /// Reset the controller
    pub async fn reset(&mut self) -> AppResult<()> {
        let command = self.commands.reset.clone();
        self.send(command).await
    }

    /// Ask the controller to print its debug/status block
    pub async fn print_debug(&mut self) -> AppResult<()> {
        let command = self.commands.debug.clone();
        self.send(command).await
    }

    /// Set bloom time and volume
    pub async fn set_bloom(&mut self, time: f64, volume: f64) -> AppResult<()> {
        let command = render_command(&self.commands.bloom, &[("time", time), ("volume", volume)])?;
        self.send(command).await
    }

    /// Set bloom water temperature
    pub async fn set_bloom_temp(&mut self, temperature: f64) -> AppResult<()> {
        let command = render_command(&self.commands.bloom_temp, &[("temperature", temperature)])?;
        self.send(command).await
    }

    /// Run the heater cool-down sequence
    pub async fn cool_heater(&mut self) -> AppResult<()> {
        let command = self.commands.cool.clone();
        self.send(command).await
    }

    /// Next telemetry line, if one is buffered
    pub async fn read_line(&mut self) -> Result<Option<String>, AdapterError> {
        self.channel.read_line().await
    }
}
