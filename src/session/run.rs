//! Brew run data model.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Seconds since the Unix epoch, microsecond resolution.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Commanded brew parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrewParams {
    /// Flow rate setting
    pub flow_rate: f64,
    /// Brew size setting
    pub size: f64,
    /// Water temperature (°F)
    pub temperature: f64,
}

/// One telemetry row
#[derive(Debug, Clone, PartialEq)]
pub struct BrewSample {
    /// Receive time, seconds since the epoch
    pub timestamp: f64,
    /// Values in schema order (schema column 1 onwards)
    pub values: Vec<f64>,
}

/// One scale reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassSample {
    /// Receive time, seconds since the epoch
    pub timestamp: f64,
    /// Mass in grams
    pub mass: f64,
    /// The scale flagged the reading as unsettled
    pub unstable: bool,
}

/// One brew, from the brew command to its terminal state
#[derive(Debug, Clone)]
pub struct BrewRun {
    /// Commanded parameters
    pub params: BrewParams,
    /// Run counter value this brew was started with
    pub cycle: u32,
    /// Telemetry rows in arrival order
    pub samples: Vec<BrewSample>,
    /// Scale readings in arrival order (scale-coupled brews only)
    pub mass_samples: Vec<MassSample>,
    /// Time of the first telemetry row
    pub started_at: Option<f64>,
    /// Time the session reached its terminal state
    pub finished_at: Option<f64>,
    /// Set once the run has been persisted
    pub success: bool,
    /// Path stem shared by the run's files
    pub stem: Option<PathBuf>,
}

impl BrewRun {
    /// Fresh run for `params`
    pub fn new(params: BrewParams, cycle: u32) -> Self {
        Self {
            params,
            cycle,
            samples: Vec::new(),
            mass_samples: Vec::new(),
            started_at: None,
            finished_at: None,
            success: false,
            stem: None,
        }
    }

    /// Append a telemetry row, stamping `started_at` on the first one
    pub fn push_sample(&mut self, timestamp: f64, values: Vec<f64>) {
        self.started_at.get_or_insert(timestamp);
        self.samples.push(BrewSample { timestamp, values });
    }

    /// Whether any telemetry row has arrived
    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Seconds between the first row and the terminal state
    pub fn duration(&self) -> Option<f64> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// What a brew session produced
#[derive(Debug)]
pub enum BrewOutcome {
    /// At least one sample arrived and the run was persisted
    Completed(BrewRun),
    /// Nothing arrived; no file was written
    NoBrew,
}

impl BrewOutcome {
    /// The completed run, if any
    pub fn run(&self) -> Option<&BrewRun> {
        match self {
            Self::Completed(run) => Some(run),
            Self::NoBrew => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_starts_run() {
        let params = BrewParams {
            flow_rate: 7.0,
            size: 4.0,
            temperature: 195.0,
        };
        let mut run = BrewRun::new(params, 3);
        assert!(!run.has_started());

        run.push_sample(100.0, vec![1.0]);
        run.push_sample(101.5, vec![2.0]);
        run.finished_at = Some(110.0);

        assert_eq!(run.started_at, Some(100.0));
        assert_eq!(run.duration(), Some(10.0));
        assert_eq!(run.samples.len(), 2);
    }
}
