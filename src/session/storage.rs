//! Run persistence.
//!
//! Each completed brew becomes one CSV named after its timestamp and commanded
//! parameters, e.g. `1700000000_temp-195_size-4_flow_rate-9_cycle-3.csv`. Files
//! belonging to the same run share that stem and add a suffix (`_mass.csv`,
//! `_summary.json`).

use super::run::{BrewRun, MassSample};
use super::telemetry::TelemetrySchema;
use crate::error::AppResult;
use std::path::{Path, PathBuf};
use tracing::info;

/// Suffix of the scale companion file
pub const MASS_SUFFIX: &str = "_mass.csv";

/// `stem` with `suffix` appended to its file name
pub fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    stem.with_file_name(name)
}

/// Writes run files under one directory
#[derive(Debug, Clone)]
pub struct RunStorage {
    dir: PathBuf,
}

impl RunStorage {
    /// Store runs under `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path stem for a run finishing at `timestamp`
    pub fn stem_for(&self, timestamp: f64, run: &BrewRun) -> PathBuf {
        let params = &run.params;
        self.dir.join(format!(
            "{:.0}_temp-{:.0}_size-{:.0}_flow_rate-{:.0}_cycle-{}",
            timestamp, params.temperature, params.size, params.flow_rate, run.cycle
        ))
    }

    /// Write the telemetry table; returns the stem
    pub fn write_run(&self, run: &BrewRun, schema: &TelemetrySchema) -> AppResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let finished = run.finished_at.unwrap_or_else(super::run::epoch_seconds);
        let stem = self.stem_for(finished, run);
        let path = with_suffix(&stem, ".csv");

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(schema.headers())?;
        for sample in &run.samples {
            let mut record = Vec::with_capacity(sample.values.len() + 1);
            record.push(sample.timestamp.to_string());
            record.extend(sample.values.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        info!(path = %path.display(), samples = run.samples.len(), "Brew data saved");
        Ok(stem)
    }

    /// Write the scale companion table next to `stem`
    pub fn write_mass(&self, stem: &Path, samples: &[MassSample]) -> AppResult<PathBuf> {
        let path = with_suffix(stem, MASS_SUFFIX);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["time", "mass"])?;
        for sample in samples {
            writer.write_record([sample.timestamp.to_string(), sample.mass.to_string()])?;
        }
        writer.flush()?;

        info!(path = %path.display(), samples = samples.len(), "Mass data saved");
        Ok(path)
    }
}
