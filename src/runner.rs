//! Test plan runner
//!
//! Drives a [`TestPlan`] through one [`BrewSession`], one entry at a time:
//!
//! 1. bloom parameters (if the entry has them)
//! 2. zero and start the acquisition worker
//! 3. brew
//! 4. scale-coupled: keep acquiring for `post_brew_delay`, stop, drain, wait for
//!    the scale to settle; otherwise just stop the acquisition
//! 5. join the acquisition with a bounded wait
//! 6. on success: write the run summary and, every `maintenance_every`
//!    completed runs, cool the heater
//!
//! The cycle counter advances as soon as the session reports a completed brew,
//! before any post-brew handling, so a run's file names are never reused.
//!
//! Drain and device-timeout errors abort the plan.

use crate::acquisition::{Acquisition, AcquisitionWorker};
use crate::adapters::DeviceChannel;
use crate::config::{DrainConfig, RunnerConfig, Settings};
use crate::error::AppResult;
use crate::instrument::{Brewer, MassReader, PumpController};
use crate::plan::{TestPlan, TestPlanEntry};
use crate::session::drain::{drain, wait_for_stability};
use crate::session::interlock::HysteresisInterlock;
use crate::session::run::{BrewOutcome, BrewParams};
use crate::session::storage::RunStorage;
use crate::session::summary::RunSummary;
use crate::session::telemetry::TelemetrySchema;
use crate::session::{BrewSession, ScaleCoupling};
use std::path::PathBuf;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Result of one plan entry
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Position in the plan
    pub index: usize,
    /// Parameters the brew was commanded with
    pub params: BrewParams,
    /// Cycle counter the brew ran with
    pub cycle: u32,
    /// Stem of the run files; `None` for a brew that never started
    pub stem: Option<PathBuf>,
    /// Summary JSON path, written for completed runs
    pub summary: Option<PathBuf>,
    /// Telemetry rows recorded
    pub samples: usize,
    /// Whether maintenance ran after this entry
    pub maintenance: bool,
}

impl RunRecord {
    /// Whether the brew produced run files
    pub fn is_success(&self) -> bool {
        self.stem.is_some()
    }
}

/// Results of a whole plan
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    /// One record per entry, in plan order
    pub records: Vec<RunRecord>,
}

impl PlanReport {
    /// Entries that produced a run
    pub fn completed(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    /// Entries where the brewer never streamed
    pub fn no_brews(&self) -> usize {
        self.records.len() - self.completed()
    }
}

/// Runs test plans and owns the cycle counter
pub struct TestPlanRunner {
    session: BrewSession,
    acquisition: Option<Box<dyn Acquisition>>,
    config: RunnerConfig,
    drain: DrainConfig,
    summary_fields: Vec<String>,
    cycle: u32,
}

impl TestPlanRunner {
    /// Runner around an assembled session, starting at cycle 0
    pub fn new(
        session: BrewSession,
        config: RunnerConfig,
        drain: DrainConfig,
        summary_fields: Vec<String>,
    ) -> Self {
        Self {
            session,
            acquisition: None,
            config,
            drain,
            summary_fields,
            cycle: 0,
        }
    }

    /// Assemble a runner from settings and open channels.
    ///
    /// `scale_and_pump` selects the scale-coupled variant.
    pub fn from_settings(
        settings: &Settings,
        brewer: Box<dyn DeviceChannel>,
        scale_and_pump: Option<(Box<dyn DeviceChannel>, Box<dyn DeviceChannel>)>,
    ) -> Self {
        let mut session = BrewSession::new(
            Brewer::new(brewer, settings.brewer.commands.clone()),
            TelemetrySchema::from_config(&settings.brewer.telemetry),
            RunStorage::new(&settings.application.save_dir),
            settings.session.clone(),
            settings.drain.clone(),
        );
        if let Some((scale, pump)) = scale_and_pump {
            session = session.with_coupling(ScaleCoupling::new(
                MassReader::new(scale, settings.scale.mode_settle),
                PumpController::new(pump, settings.pump.command.clone()),
                Box::new(HysteresisInterlock::from_config(&settings.interlock)),
                settings.pump.setpoint,
            ));
        }

        Self::new(
            session,
            settings.runner.clone(),
            settings.drain.clone(),
            settings.brewer.telemetry.summary_fields.clone(),
        )
    }

    /// Record `acquisition` alongside every brew
    pub fn with_acquisition(mut self, acquisition: Box<dyn Acquisition>) -> Self {
        self.acquisition = Some(acquisition);
        self
    }

    /// Completed runs so far
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// The brew session driven by this runner
    pub fn session(&self) -> &BrewSession {
        &self.session
    }

    /// Reset the brewer and print its status block
    pub async fn prepare(&mut self) -> AppResult<()> {
        let pause = self.config.handshake_pause;
        let brewer = self.session.brewer_mut();
        brewer.reset().await?;
        sleep(pause).await;
        brewer.print_debug().await?;
        sleep(pause).await;
        Ok(())
    }

    /// Run every entry in order
    pub async fn run(&mut self, plan: &TestPlan) -> AppResult<PlanReport> {
        info!(entries = plan.len(), coupled = self.session.is_coupled(), "Running test plan");
        let mut report = PlanReport::default();
        for (index, entry) in plan.entries().iter().enumerate() {
            info!(index, of = plan.len(), ?entry, "Plan entry");
            match self.run_entry(index, entry).await {
                Ok(record) => report.records.push(record),
                Err(err) if err.is_device_timeout() => {
                    error!(index, error = %err, "Device timeout, aborting test plan");
                    return Err(err);
                }
                Err(err) => {
                    error!(index, error = %err, "Test plan aborted");
                    return Err(err);
                }
            }
        }
        info!(
            completed = report.completed(),
            no_brews = report.no_brews(),
            "Test plan finished"
        );
        Ok(report)
    }

    /// Run a single plan entry
    pub async fn run_entry(&mut self, index: usize, entry: &TestPlanEntry) -> AppResult<RunRecord> {
        if let Some(bloom) = entry.bloom {
            let brewer = self.session.brewer_mut();
            brewer.set_bloom(bloom.time, bloom.volume).await?;
            sleep(self.config.bloom_settle).await;
            brewer.set_bloom_temp(bloom.temperature).await?;
            sleep(self.config.bloom_settle).await;
        }

        let worker = match self.acquisition.take() {
            Some(mut acquisition) => {
                if self.config.counter_acquisition {
                    if let Err(err) = acquisition.zero() {
                        self.acquisition = Some(acquisition);
                        return Err(err);
                    }
                }
                Some(AcquisitionWorker::start(acquisition))
            }
            None => None,
        };

        let params = entry.params();
        let cycle = self.cycle;
        let brewed = match self.session.run(&params, cycle).await {
            Ok(outcome) => {
                // run files are on disk; the cycle is spent even if the drain fails
                if matches!(outcome, BrewOutcome::Completed(_)) {
                    self.cycle += 1;
                }
                self.after_brew(worker.as_ref()).await.map(|()| outcome)
            }
            Err(err) => Err(err),
        };

        if let Some(worker) = worker {
            match worker.stop_and_join(self.config.join_timeout).await {
                Ok(acquisition) => self.acquisition = Some(acquisition),
                Err(join_err) => {
                    if let Err(err) = brewed {
                        warn!(error = %join_err, "Acquisition also failed");
                        return Err(err);
                    }
                    return Err(join_err);
                }
            }
        }

        let mut record = RunRecord {
            index,
            params,
            cycle,
            stem: None,
            summary: None,
            samples: 0,
            maintenance: false,
        };
        let run = match brewed? {
            BrewOutcome::Completed(run) => run,
            BrewOutcome::NoBrew => return Ok(record),
        };

        record.samples = run.samples.len();
        if let Some(stem) = &run.stem {
            let summary = RunSummary::from_run(&run, self.session.schema(), &self.summary_fields);
            record.summary = Some(summary.write(stem)?);
        }
        record.stem = run.stem;

        let every = self.config.maintenance_every;
        if self.session.is_coupled() && every > 0 && self.cycle % every == 0 {
            self.maintenance().await?;
            record.maintenance = true;
        }
        Ok(record)
    }

    /// Post-brew handling while the acquisition is still running
    async fn after_brew(&mut self, worker: Option<&AcquisitionWorker>) -> AppResult<()> {
        let stop = worker.map(AcquisitionWorker::stop_signal);
        let Some(coupling) = self.session.coupling_mut() else {
            if let Some(stop) = stop {
                stop.raise();
            }
            return Ok(());
        };

        sleep(self.config.post_brew_delay).await;
        if let Some(stop) = stop {
            stop.raise();
        }
        drain(&mut coupling.reader, &mut coupling.pump, &self.drain).await?;
        wait_for_stability(&mut coupling.reader, &self.drain).await?;
        coupling.reader.disable_continuous().await?;
        Ok(())
    }

    /// Run the pump through a heater cool-down, then re-probe the brewer
    pub async fn maintenance(&mut self) -> AppResult<()> {
        info!(cycle = self.cycle, "Maintenance: cooling heater");
        if let Some(coupling) = self.session.coupling_mut() {
            coupling.pump.turn_on(self.drain.setpoint).await?;
        }
        self.session.brewer_mut().cool_heater().await?;
        sleep(self.config.cool_down).await;
        if let Some(coupling) = self.session.coupling_mut() {
            coupling.pump.turn_off().await?;
        }
        sleep(self.config.handshake_pause).await;
        self.session.brewer_mut().print_debug().await?;
        sleep(self.config.handshake_pause).await;
        Ok(())
    }
}
