//! Per-run summary statistics, written next to the run CSV as JSON.

use super::run::BrewRun;
use super::storage::with_suffix;
use super::telemetry::TelemetrySchema;
use crate::error::AppResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix of the summary file
pub const SUMMARY_SUFFIX: &str = "_summary.json";

/// Min/max/mean/last of one telemetry column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Value of the final sample
    pub last: f64,
}

impl FieldStats {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut last = None;
        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
            last = Some(value);
        }
        Some(Self {
            min,
            max,
            mean: sum / count as f64,
            last: last?,
        })
    }
}

/// Scale statistics of a scale-coupled run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MassStats {
    /// Mass readings taken during the brew
    pub readings: usize,
    /// Heaviest reading in grams
    pub peak: f64,
    /// Final reading in grams
    pub last: f64,
    /// Readings the scale flagged as unsettled
    pub unstable_readings: usize,
}

/// Summary of one completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Cycle counter the run was recorded under
    pub cycle: u32,
    /// Commanded flow rate
    pub flow_rate: f64,
    /// Brew size
    pub size: f64,
    /// Target temperature
    pub temperature: f64,
    /// Telemetry rows kept
    pub samples: usize,
    /// Seconds from first to last sample; `None` for a single-sample run
    pub duration_s: Option<f64>,
    /// Statistics per reported telemetry column
    pub fields: BTreeMap<String, FieldStats>,
    /// Scale statistics, scale-coupled runs only
    pub mass: Option<MassStats>,
}

impl RunSummary {
    /// Summarise `run`, reporting the listed telemetry columns.
    pub fn from_run(run: &BrewRun, schema: &TelemetrySchema, fields: &[String]) -> Self {
        let field_stats = fields
            .iter()
            .filter_map(|name| {
                let index = schema.value_index(name)?;
                let values = run.samples.iter().filter_map(|s| s.values.get(index).copied());
                Some((name.clone(), FieldStats::from_values(values)?))
            })
            .collect();

        let mass = run.mass_samples.last().map(|last| MassStats {
            readings: run.mass_samples.len(),
            peak: run
                .mass_samples
                .iter()
                .map(|s| s.mass)
                .fold(f64::NEG_INFINITY, f64::max),
            last: last.mass,
            unstable_readings: run.mass_samples.iter().filter(|s| s.unstable).count(),
        });

        Self {
            cycle: run.cycle,
            flow_rate: run.params.flow_rate,
            size: run.params.size,
            temperature: run.params.temperature,
            samples: run.samples.len(),
            duration_s: run.duration(),
            fields: field_stats,
            mass,
        }
    }

    /// Write as pretty JSON next to `stem`
    pub fn write(&self, stem: &Path) -> AppResult<PathBuf> {
        let path = with_suffix(stem, SUMMARY_SUFFIX);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(path)
    }
}
