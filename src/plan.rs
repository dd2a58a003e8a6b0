//! Test plans
//!
//! A plan is an ordered list of brew parameter sets, read from an operator CSV
//! (`Type, Temp, Size` plus optional `Bloom_Time, Bloom_Volume, Bloom_Temp`) or
//! drawn at random. Random draws are independent per field, so a generated plan
//! may repeat entries and is not balanced.

use crate::error::{AppResult, BenchError};
use crate::session::run::{epoch_seconds, BrewParams};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Brew sizes drawn by [`TestPlan::generate`]
pub const SIZES: [f64; 2] = [2.0, 4.0];
/// Flow rates drawn by [`TestPlan::generate`]
pub const FLOW_RATES: [f64; 3] = [5.0, 7.0, 9.0];
/// Bloom times (s)
pub const BLOOM_TIMES: [f64; 2] = [10.0, 15.0];
/// Bloom volumes
pub const BLOOM_VOLUMES: [f64; 4] = [17.0, 19.5, 22.0, 24.5];
/// Bloom temperatures
pub const BLOOM_TEMPS: [f64; 4] = [80.0, 85.0, 90.0, 95.0];
/// Generated brew temperatures fall in this range (°F)
pub const TEMPERATURE_RANGE: std::ops::Range<f64> = 186.0..204.0;

/// Suffix of a generated plan file
pub const GENERATED_SUFFIX: &str = "_generated_test_plan.csv";

/// Pre-infusion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bloom {
    /// Bloom time in seconds
    pub time: f64,
    /// Bloom water volume
    pub volume: f64,
    /// Bloom water temperature
    pub temperature: f64,
}

/// One brew of a plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestPlanEntry {
    /// Flow rate setting (the `Type` column of an operator plan)
    pub flow_rate: f64,
    /// Brew size setting
    pub size: f64,
    /// Target temperature
    pub temperature: f64,
    /// Pre-infusion, if the plan carries bloom columns
    pub bloom: Option<Bloom>,
}

impl TestPlanEntry {
    /// Brew parameters of this entry
    pub fn params(&self) -> BrewParams {
        BrewParams {
            flow_rate: self.flow_rate,
            size: self.size,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    #[serde(rename = "Type")]
    flow_rate: f64,
    #[serde(rename = "Temp")]
    temperature: f64,
    #[serde(rename = "Size")]
    size: f64,
    #[serde(rename = "Bloom_Time", default)]
    bloom_time: Option<f64>,
    #[serde(rename = "Bloom_Volume", default)]
    bloom_volume: Option<f64>,
    #[serde(rename = "Bloom_Temp", default)]
    bloom_temp: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BasicRow {
    #[serde(rename = "Type")]
    flow_rate: f64,
    #[serde(rename = "Temp")]
    temperature: f64,
    #[serde(rename = "Size")]
    size: f64,
}

#[derive(Debug, Serialize)]
struct BloomRow {
    #[serde(rename = "Type")]
    flow_rate: f64,
    #[serde(rename = "Temp")]
    temperature: f64,
    #[serde(rename = "Size")]
    size: f64,
    #[serde(rename = "Bloom_Time")]
    bloom_time: f64,
    #[serde(rename = "Bloom_Volume")]
    bloom_volume: f64,
    #[serde(rename = "Bloom_Temp")]
    bloom_temp: f64,
}

/// Ordered brew parameter sets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestPlan {
    entries: Vec<TestPlanEntry>,
}

impl TestPlan {
    /// Plan from entries, run in the given order
    pub fn new(entries: Vec<TestPlanEntry>) -> Self {
        Self { entries }
    }

    /// Entries in run order
    pub fn entries(&self) -> &[TestPlanEntry] {
        &self.entries
    }

    /// Number of brews
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for a plan with no brews
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry carries bloom parameters
    pub fn has_bloom(&self) -> bool {
        self.entries.iter().any(|e| e.bloom.is_some())
    }

    /// Read an operator plan. Bloom columns are optional, but a row that fills
    /// some of them must fill all three.
    pub fn read_csv(path: &Path) -> AppResult<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = Vec::new();
        for (index, row) in reader.deserialize::<PlanRow>().enumerate() {
            let row = row?;
            let bloom = match (row.bloom_time, row.bloom_volume, row.bloom_temp) {
                (Some(time), Some(volume), Some(temperature)) => Some(Bloom {
                    time,
                    volume,
                    temperature,
                }),
                (None, None, None) => None,
                _ => {
                    return Err(BenchError::Configuration(format!(
                        "{}: row {} has incomplete bloom parameters",
                        path.display(),
                        index + 1
                    )))
                }
            };
            entries.push(TestPlanEntry {
                flow_rate: row.flow_rate,
                size: row.size,
                temperature: row.temperature,
                bloom,
            });
        }
        info!(path = %path.display(), entries = entries.len(), "Test plan loaded");
        Ok(Self { entries })
    }

    /// Write in the operator format; bloom columns are written when any entry has them.
    pub fn write_csv(&self, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        if self.has_bloom() {
            for entry in &self.entries {
                let bloom = entry.bloom.ok_or_else(|| {
                    BenchError::Configuration("plan mixes bloom and plain entries".into())
                })?;
                writer.serialize(BloomRow {
                    flow_rate: entry.flow_rate,
                    temperature: entry.temperature,
                    size: entry.size,
                    bloom_time: bloom.time,
                    bloom_volume: bloom.volume,
                    bloom_temp: bloom.temperature,
                })?;
            }
        } else {
            for entry in &self.entries {
                writer.serialize(BasicRow {
                    flow_rate: entry.flow_rate,
                    temperature: entry.temperature,
                    size: entry.size,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Draw `count` entries, each field independently.
    pub fn generate<R: Rng>(count: usize, bloom: bool, rng: &mut R) -> Self {
        let entries = (0..count)
            .map(|_| {
                let temperature = rng.gen_range(TEMPERATURE_RANGE);
                let size = pick(rng, &SIZES);
                let flow_rate = pick(rng, &FLOW_RATES);
                let bloom = bloom.then(|| Bloom {
                    time: pick(rng, &BLOOM_TIMES),
                    volume: pick(rng, &BLOOM_VOLUMES),
                    temperature: pick(rng, &BLOOM_TEMPS),
                });
                TestPlanEntry {
                    flow_rate,
                    size,
                    temperature,
                    bloom,
                }
            })
            .collect();
        Self { entries }
    }

    /// Write a generated plan as `{timestamp}_generated_test_plan.csv` under `dir`.
    pub fn save_generated(&self, dir: &Path) -> AppResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{:.0}{}", epoch_seconds(), GENERATED_SUFFIX));
        self.write_csv(&path)?;
        info!(path = %path.display(), entries = self.len(), "Generated test plan saved");
        Ok(path)
    }
}

fn pick<R: Rng>(rng: &mut R, options: &[f64]) -> f64 {
    options[rng.gen_range(0..options.len())]
}
