//! Bench instruments
//!
//! Typed command sets layered over a [`crate::adapters::DeviceChannel`]:
//!
//! - [`Brewer`]: brew controller and telemetry source
//! - [`MassReader`]: scale polling and continuous-report mode
//! - [`PumpController`]: drain pump on/off

pub mod brewer;
pub mod pump;
pub mod scale;

pub use brewer::Brewer;
pub use pump::PumpController;
pub use scale::{parse_scale_response, MassReader, MassReading};

use crate::error::{AppResult, BenchError};
use std::collections::HashMap;

/// Render a command template such as `brew {temperature} {size} {flow_rate}`.
pub(crate) fn render_command(template: &str, vars: &[(&str, f64)]) -> AppResult<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    strfmt::strfmt(template, &vars)
        .map_err(|e| BenchError::CommandFormat(format!("'{}': {}", template, e)))
}
