//! Drain pump controller
//!
//! There is no read-back from the pump: `pump_on` records what was last
//! commanded and is the only state the interlock consults.

use super::render_command;
use crate::adapters::DeviceChannel;
use crate::error::AppResult;
use tracing::info;

/// Drain pump on a device channel
pub struct PumpController {
    channel: Box<dyn DeviceChannel>,
    template: String,
    pump_on: bool,
}

impl PumpController {
    /// Wrap a connected channel. `template` carries a `{setpoint}` placeholder.
    pub fn new(channel: Box<dyn DeviceChannel>, template: impl Into<String>) -> Self {
        Self {
            channel,
            template: template.into(),
            pump_on: false,
        }
    }

    /// Last commanded state
    pub fn is_on(&self) -> bool {
        self.pump_on
    }

    async fn set(&mut self, setpoint: f64) -> AppResult<()> {
        let command = render_command(&self.template, &[("setpoint", setpoint)])?;
        self.channel.send(&command).await?;
        Ok(())
    }

    /// Run the pump. The command is sent on every call.
    pub async fn turn_on(&mut self, setpoint: f64) -> AppResult<()> {
        self.set(setpoint).await?;
        if !self.pump_on {
            info!(setpoint, "Pump on");
        }
        self.pump_on = true;
        Ok(())
    }

    /// Stop the pump. The command is sent on every call.
    pub async fn turn_off(&mut self) -> AppResult<()> {
        self.set(0.0).await?;
        if self.pump_on {
            info!("Pump off");
        }
        self.pump_on = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    #[tokio::test]
    async fn test_turn_on_twice_sends_twice() {
        let mock = MockAdapter::new("pump");
        let mut pump = PumpController::new(Box::new(mock.clone()), "pump {setpoint}");

        pump.turn_on(1000.0).await.unwrap();
        pump.turn_on(1000.0).await.unwrap();
        assert!(pump.is_on());
        assert_eq!(mock.count_sent("pump 1000"), 2);

        pump.turn_off().await.unwrap();
        assert!(!pump.is_on());
        assert_eq!(mock.sent().last().map(String::as_str), Some("pump 0"));
    }

    #[tokio::test]
    async fn test_failed_command_keeps_state() {
        let mock = MockAdapter::new("pump");
        let mut pump = PumpController::new(Box::new(mock.clone()), "pump {setpoint}");

        mock.inject_next_failure();
        assert!(pump.turn_on(1000.0).await.is_err());
        assert!(!pump.is_on());
    }
}
