//! Scale drain routine.
//!
//! Runs the pump until the scale has read "empty" enough times, bounded by a
//! wall-clock budget. A scale that stays silent across a re-poll is treated as
//! unresponsive; in every failure path the pump is commanded off before the error
//! is returned.

use crate::config::DrainConfig;
use crate::error::{AppResult, BenchError};
use crate::instrument::{MassReader, PumpController};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// How a successful drain went
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    /// Time from pump start to the last empty reading
    pub elapsed: Duration,
    /// Scale polls taken
    pub polls: u32,
    /// Final mass reading
    pub last_mass: Option<f64>,
}

/// Empty the scale through the drain pump.
pub async fn drain(
    reader: &mut MassReader,
    pump: &mut PumpController,
    config: &DrainConfig,
) -> AppResult<DrainReport> {
    info!("Draining scale");
    match drain_until_empty(reader, pump, config).await {
        Ok(report) => {
            sleep(config.settle).await;
            pump.turn_off().await?;
            reader.disable_continuous().await?;
            info!(elapsed = ?report.elapsed, polls = report.polls, "Scale drained");
            Ok(report)
        }
        Err(err) => {
            if let Err(stop_err) = pump.turn_off().await {
                warn!(error = %stop_err, "Failed to stop pump after drain failure");
            }
            Err(err)
        }
    }
}

async fn drain_until_empty(
    reader: &mut MassReader,
    pump: &mut PumpController,
    config: &DrainConfig,
) -> AppResult<DrainReport> {
    pump.turn_on(config.setpoint).await?;

    let started = Instant::now();
    let mut empty_counter = config.empty_count;
    let mut polls = 0u32;
    let mut last_mass = None;

    while empty_counter > 0 {
        if started.elapsed() >= config.budget {
            warn!(budget = ?config.budget, ?last_mass, "Drain budget exhausted");
            return Err(BenchError::DrainTimeout(config.budget));
        }

        polls += 1;
        let mut reading = reader.poll().await?;
        if reading.mass.is_none() {
            sleep(config.repoll_delay).await;
            polls += 1;
            reading = reader.poll().await?;
        }
        let Some(mass) = reading.mass else {
            warn!("Scale failed to respond during drain");
            return Err(BenchError::ScaleUnresponsive);
        };

        last_mass = Some(mass);
        if mass < config.empty_threshold {
            empty_counter -= 1;
            debug!(mass, remaining = empty_counter, "Empty reading");
        }

        if empty_counter > 0 {
            sleep(config.poll_interval).await;
        }
    }

    Ok(DrainReport {
        elapsed: started.elapsed(),
        polls,
        last_mass,
    })
}

/// Poll until the scale reports a settled reading.
pub async fn wait_for_stability(reader: &mut MassReader, config: &DrainConfig) -> AppResult<()> {
    let started = Instant::now();
    loop {
        let reading = reader.poll().await?;
        if !reading.unstable {
            info!(mass = ?reading.mass, "Scale stable");
            return Ok(());
        }
        if started.elapsed() >= config.stability_budget {
            return Err(BenchError::StabilityTimeout(config.stability_budget));
        }
        debug!("Waiting for scale stability");
        sleep(config.stability_poll).await;
    }
}
