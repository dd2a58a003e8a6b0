//! Bench configuration using Figment
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (by default `config/default.toml`)
//! 3. Environment variables prefixed with `BREWBENCH_`, nested keys split on `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! BREWBENCH_APPLICATION__LOG_LEVEL=debug
//! BREWBENCH_SCALE__LINK__PORT=/dev/ttyUSB2
//! BREWBENCH_SESSION__INACTIVITY_BUDGET="15s"
//! ```
//!
//! Durations are written in human form (`"500ms"`, `"1s 100ms"`, `"4m"`).

use crate::error::{AppResult, BenchError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Telemetry header emitted by the brewer firmware.
pub const DEFAULT_HEADERS: &str = "NOTES,Predicted_Temp,Effective Target Temp,dT/dx,Estimated Temp,Measured_Temp,Flow Command,Flow Traget,Target Temp,Power Command,Flow Measured,T_offset,pwr_flow_offset,V_c2,ramp_coeff,T_in,vol";

/// Top-level bench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Brewer controller link and protocol
    #[serde(default)]
    pub brewer: BrewerConfig,
    /// Scale link
    #[serde(default)]
    pub scale: ScaleConfig,
    /// Drain pump controller link
    #[serde(default)]
    pub pump: PumpConfig,
    /// Brew session timing
    #[serde(default)]
    pub session: SessionConfig,
    /// Mass-driven pump interlock
    #[serde(default)]
    pub interlock: InterlockConfig,
    /// Drain routine
    #[serde(default)]
    pub drain: DrainConfig,
    /// Test plan runner
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory receiving run files and generated plans
    pub save_dir: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "brew_bench".to_string(),
            log_level: "info".to_string(),
            save_dir: PathBuf::from("runs"),
        }
    }
}

/// Serial link parameters shared by every device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port (e.g. "/dev/ttyUSB0", "COM28")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound on any single read
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Appended to every command
    pub line_terminator: String,
}

impl LinkConfig {
    fn new(port: &str, baud_rate: u32, line_terminator: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            timeout: Duration::from_millis(50),
            line_terminator: line_terminator.to_string(),
        }
    }
}

/// Brewer controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrewerConfig {
    /// Serial link
    pub link: LinkConfig,
    /// Command templates
    pub commands: BrewerCommands,
    /// Telemetry line layout
    pub telemetry: TelemetryConfig,
}

impl Default for BrewerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::new("/dev/ttyUSB0", 115_200, "\n"),
            commands: BrewerCommands::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Brewer command templates, rendered with `strfmt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrewerCommands {
    /// Placeholders: `{temperature}`, `{size}`, `{flow_rate}`
    pub brew: String,
    /// Controller reset
    pub reset: String,
    /// Debug/status print
    pub debug: String,
    /// Placeholders: `{time}`, `{volume}`
    pub bloom: String,
    /// Placeholder: `{temperature}`
    pub bloom_temp: String,
    /// Heater cool-down
    pub cool: String,
}

impl Default for BrewerCommands {
    fn default() -> Self {
        Self {
            brew: "brew {temperature} {size} {flow_rate}".to_string(),
            reset: "reset".to_string(),
            debug: "debug".to_string(),
            bloom: "bloom {time} {volume}".to_string(),
            bloom_temp: "bloom_temp {temperature}".to_string(),
            cool: "cool".to_string(),
        }
    }
}

/// Telemetry line layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Ordered column names; column 0 carries the sample timestamp
    pub headers: Vec<String>,
    /// Field separator
    pub delimiter: char,
    /// Columns reported in the run summary
    pub summary_fields: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            headers: DEFAULT_HEADERS.split(',').map(str::to_string).collect(),
            delimiter: ',',
            summary_fields: vec![
                "Estimated Temp".to_string(),
                "Measured_Temp".to_string(),
                "Target Temp".to_string(),
            ],
        }
    }
}

/// Scale configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// Serial link
    pub link: LinkConfig,
    /// Pause after toggling continuous-report mode
    #[serde(with = "humantime_serde")]
    pub mode_settle: Duration,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::new("/dev/ttyUSB1", 9600, "\r\n"),
            mode_settle: Duration::from_millis(500),
        }
    }
}

/// Drain pump controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Serial link
    pub link: LinkConfig,
    /// Placeholder: `{setpoint}`
    pub command: String,
    /// Setpoint used when the interlock turns the pump on
    pub setpoint: f64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::new("/dev/ttyUSB2", 115_200, "\n"),
            command: "pump {setpoint}".to_string(),
            setpoint: 1000.0,
        }
    }
}

/// Brew session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Silence that ends a brew without a scale
    #[serde(with = "humantime_serde")]
    pub inactivity_budget: Duration,
    /// Silence that ends a scale-coupled brew
    #[serde(with = "humantime_serde")]
    pub coupled_inactivity_budget: Duration,
    /// Silence before the first sample that reports "no brew"
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,
    /// Sleep between iterations when the brewer has nothing to say
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Back-to-back channel faults tolerated before the session gives up
    pub max_consecutive_faults: u32,
    /// Pause between a brewer reset and the recovery drain
    #[serde(with = "humantime_serde")]
    pub recovery_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_budget: Duration::from_secs(10),
            coupled_inactivity_budget: Duration::from_secs(20),
            start_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(10),
            max_consecutive_faults: 50,
            recovery_pause: Duration::from_secs(1),
        }
    }
}

/// Mass-driven pump interlock thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlockConfig {
    /// Pump turns on above this mass (g)
    pub on_threshold: f64,
    /// Pump turns off once the trailing mean falls under this mass (g)
    pub off_threshold: f64,
    /// Trailing window length
    pub window: usize,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            on_threshold: 370.0,
            off_threshold: 200.0,
            window: 10,
        }
    }
}

/// Drain routine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Pump setpoint while draining
    pub setpoint: f64,
    /// Mass (g) counted as empty
    pub empty_threshold: f64,
    /// Empty readings required
    pub empty_count: u32,
    /// Wall-clock budget
    #[serde(with = "humantime_serde")]
    pub budget: Duration,
    /// Wait before re-polling a silent scale
    #[serde(with = "humantime_serde")]
    pub repoll_delay: Duration,
    /// Pause between polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Pump keeps running this long after the scale reads empty
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Pause between stability polls
    #[serde(with = "humantime_serde")]
    pub stability_poll: Duration,
    /// Bound on the stability wait
    #[serde(with = "humantime_serde")]
    pub stability_budget: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            setpoint: 1000.0,
            empty_threshold: 10.0,
            empty_count: 10,
            budget: Duration::from_secs(240),
            repoll_delay: Duration::from_millis(1100),
            poll_interval: Duration::from_millis(100),
            settle: Duration::from_secs(4),
            stability_poll: Duration::from_secs(1),
            stability_budget: Duration::from_secs(120),
        }
    }
}

/// Test plan runner parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Keep acquiring this long after a scale-coupled brew ends
    #[serde(with = "humantime_serde")]
    pub post_brew_delay: Duration,
    /// Maintenance after every Nth completed run (0 disables)
    pub maintenance_every: u32,
    /// Wait after the cool-heater command
    #[serde(with = "humantime_serde")]
    pub cool_down: Duration,
    /// Bound on joining the acquisition worker
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,
    /// Pause after each bloom command
    #[serde(with = "humantime_serde")]
    pub bloom_settle: Duration,
    /// Pause around the reset/debug handshake
    #[serde(with = "humantime_serde")]
    pub handshake_pause: Duration,
    /// Zero the acquisition counters before each run
    pub counter_acquisition: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            post_brew_delay: Duration::from_secs(10),
            maintenance_every: 5,
            cool_down: Duration::from_secs(0),
            join_timeout: Duration::from_secs(30),
            bloom_settle: Duration::from_millis(100),
            handshake_pause: Duration::from_secs(1),
            counter_acquisition: false,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `path` (or [`DEFAULT_CONFIG_PATH`]) and the environment.
    ///
    /// A missing file is not an error; defaults and environment overrides still apply.
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BREWBENCH_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check semantic constraints that parsing cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.brewer.telemetry.headers.len() < 2 {
            return Err(BenchError::Configuration(
                "Telemetry schema needs a timestamp column and at least one value column"
                    .to_string(),
            ));
        }

        for field in &self.brewer.telemetry.summary_fields {
            if !self.brewer.telemetry.headers[1..].contains(field) {
                return Err(BenchError::Configuration(format!(
                    "Summary field '{}' is not a telemetry value column",
                    field
                )));
            }
        }

        let interlock = &self.interlock;
        if interlock.window == 0 {
            return Err(BenchError::Configuration(
                "Interlock window must be at least 1".to_string(),
            ));
        }
        if interlock.off_threshold >= interlock.on_threshold {
            return Err(BenchError::Configuration(format!(
                "Interlock off threshold {} must be below on threshold {}",
                interlock.off_threshold, interlock.on_threshold
            )));
        }

        if self.drain.empty_count == 0 {
            return Err(BenchError::Configuration(
                "Drain empty_count must be at least 1".to_string(),
            ));
        }
        if self.drain.budget.is_zero() {
            return Err(BenchError::Configuration(
                "Drain budget must be non-zero".to_string(),
            ));
        }

        if self.session.max_consecutive_faults == 0 {
            return Err(BenchError::Configuration(
                "max_consecutive_faults must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
