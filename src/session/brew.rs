//! Brew session state machine.
//!
//! A session sends one brew command and then polls the brewer until the
//! telemetry stream goes quiet. With a [`ScaleCoupling`] attached, every tick
//! first polls the scale and lets the pump interlock act on the fresh mass
//! reading before the brewer line is read.
//!
//! ```text
//! Starting -> Streaming <-> IdleGrace -> Terminated(Success)
//!                                     -> Terminated(NoData)
//! ```

use super::drain::drain;
use super::interlock::{PumpAction, PumpInterlock};
use super::run::{epoch_seconds, BrewOutcome, BrewParams, BrewRun, MassSample};
use super::storage::RunStorage;
use super::telemetry::{LineKind, TelemetrySchema};
use crate::config::{DrainConfig, SessionConfig};
use crate::error::{AppResult, BenchError};
use crate::instrument::{Brewer, MassReader, PumpController};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// At least one sample arrived and the stream then went quiet
    Success,
    /// Nothing arrived before the start timeout
    NoData,
}

/// Brew session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Brew command sent, waiting for the first sample
    Starting,
    /// Telemetry is arriving
    Streaming,
    /// Stream went quiet; the inactivity budget is running
    IdleGrace,
    /// Session over
    Terminated(Termination),
}

/// What one tick produced on the brewer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Sample,
    Diagnostic,
    Silent,
}

/// Scale, pump and interlock driven once per session tick
pub struct ScaleCoupling {
    /// Scale mass reader
    pub reader: MassReader,
    /// Drain pump
    pub pump: PumpController,
    interlock: Box<dyn PumpInterlock>,
    setpoint: f64,
}

impl ScaleCoupling {
    /// Couple a scale and pump through `interlock`; the pump runs at `setpoint` when on.
    pub fn new(
        reader: MassReader,
        pump: PumpController,
        interlock: Box<dyn PumpInterlock>,
        setpoint: f64,
    ) -> Self {
        Self {
            reader,
            pump,
            interlock,
            setpoint,
        }
    }

    /// Poll the scale and apply the interlock decision
    async fn tick(&mut self, run: &mut BrewRun) -> AppResult<()> {
        let reading = self.reader.poll().await?;
        let Some(mass) = reading.mass else {
            return Ok(());
        };

        let sample = MassSample {
            timestamp: epoch_seconds(),
            mass,
            unstable: reading.unstable,
        };
        run.mass_samples.push(sample);

        match self.interlock.on_tick(&sample, self.pump.is_on()) {
            PumpAction::On => self.pump.turn_on(self.setpoint).await?,
            PumpAction::Off => self.pump.turn_off().await?,
            PumpAction::Hold => {}
        }
        Ok(())
    }

    /// Stop the pump, logging instead of failing
    async fn stop_pump(&mut self) {
        if let Err(err) = self.pump.turn_off().await {
            warn!(error = %err, "Failed to stop pump");
        }
    }
}

/// One brewer, optionally coupled to a scale and pump
pub struct BrewSession {
    brewer: Brewer,
    coupling: Option<ScaleCoupling>,
    schema: TelemetrySchema,
    storage: RunStorage,
    session: SessionConfig,
    drain: DrainConfig,
    state: SessionState,
}

impl BrewSession {
    /// Base session: brewer only
    pub fn new(
        brewer: Brewer,
        schema: TelemetrySchema,
        storage: RunStorage,
        session: SessionConfig,
        drain: DrainConfig,
    ) -> Self {
        Self {
            brewer,
            coupling: None,
            schema,
            storage,
            session,
            drain,
            state: SessionState::Starting,
        }
    }

    /// Attach a scale coupling
    pub fn with_coupling(mut self, coupling: ScaleCoupling) -> Self {
        self.coupling = Some(coupling);
        self
    }

    /// Brewer for commands issued outside a brew
    pub fn brewer_mut(&mut self) -> &mut Brewer {
        &mut self.brewer
    }

    /// Scale and pump, when attached
    pub fn coupling_mut(&mut self) -> Option<&mut ScaleCoupling> {
        self.coupling.as_mut()
    }

    /// Whether a scale and pump are attached
    pub fn is_coupled(&self) -> bool {
        self.coupling.is_some()
    }

    /// State the last (or current) brew is in
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Telemetry layout
    pub fn schema(&self) -> &TelemetrySchema {
        &self.schema
    }

    /// Where run files are written
    pub fn storage(&self) -> &RunStorage {
        &self.storage
    }

    /// Silence that ends a brew once samples have arrived
    pub fn inactivity_budget(&self) -> Duration {
        if self.is_coupled() {
            self.session.coupled_inactivity_budget
        } else {
            self.session.inactivity_budget
        }
    }

    /// Run one brew to its terminal state.
    ///
    /// Returns [`BrewOutcome::NoBrew`] when the brewer never produced a sample
    /// before the start timeout; nothing is written in that case. Errors are
    /// reserved for failures the session cannot recover from: the brew command
    /// itself, a failed recovery drain, persistence, or a run of back-to-back
    /// channel faults.
    pub async fn run(&mut self, params: &BrewParams, cycle: u32) -> AppResult<BrewOutcome> {
        self.state = SessionState::Starting;
        let mut run = BrewRun::new(*params, cycle);

        self.brewer
            .brew(params.temperature, params.size, params.flow_rate)
            .await?;
        if let Some(coupling) = self.coupling.as_mut() {
            coupling.interlock.reset();
            coupling.reader.enable_continuous().await?;
        }
        self.state = SessionState::Streaming;

        let budget = self.inactivity_budget();
        let mut last_productive = Instant::now();
        let mut faults = 0u32;

        let termination = loop {
            match self.tick(&mut run).await {
                Ok(Tick::Sample | Tick::Diagnostic) => {
                    faults = 0;
                    last_productive = Instant::now();
                    if self.state == SessionState::IdleGrace {
                        debug!("Telemetry resumed");
                        self.state = SessionState::Streaming;
                    }
                }
                Ok(Tick::Silent) => {
                    faults = 0;
                    let gap = last_productive.elapsed();
                    if run.has_started() {
                        self.state = SessionState::IdleGrace;
                        if gap > budget {
                            break Termination::Success;
                        }
                    } else if gap > self.session.start_timeout {
                        break Termination::NoData;
                    }
                    sleep(self.session.poll_interval).await;
                }
                Err(err) => {
                    faults += 1;
                    warn!(error = %err, faults, "Brew loop fault");
                    if faults >= self.session.max_consecutive_faults {
                        if let Some(coupling) = self.coupling.as_mut() {
                            coupling.stop_pump().await;
                        }
                        return Err(BenchError::Instrument(format!(
                            "{faults} consecutive faults during brew, last: {err}"
                        )));
                    }
                    if self.is_coupled() {
                        self.recover().await?;
                    } else {
                        sleep(self.session.poll_interval).await;
                    }
                }
            }
        };

        self.state = SessionState::Terminated(termination);
        match termination {
            Termination::NoData => {
                info!("No brew");
                if let Some(coupling) = self.coupling.as_mut() {
                    coupling.reader.disable_continuous().await?;
                }
                Ok(BrewOutcome::NoBrew)
            }
            Termination::Success => self.finish(run).await,
        }
    }

    /// One iteration: scale first, then at most one brewer line
    async fn tick(&mut self, run: &mut BrewRun) -> AppResult<Tick> {
        if let Some(coupling) = self.coupling.as_mut() {
            coupling.tick(run).await?;
        }

        let Some(line) = self.brewer.read_line().await? else {
            return Ok(Tick::Silent);
        };
        let timestamp = epoch_seconds();
        if !line.trim().is_empty() {
            info!(target: "brewer", "{:.3} {}", timestamp, line);
        }

        Ok(match self.schema.classify(&line) {
            LineKind::Sample(values) => {
                if !run.has_started() {
                    info!("Brew started");
                }
                run.push_sample(timestamp, values);
                Tick::Sample
            }
            LineKind::Diagnostic => Tick::Diagnostic,
            LineKind::Empty => Tick::Silent,
        })
    }

    /// Reset the brewer and force the scale empty after a fault
    async fn recover(&mut self) -> AppResult<()> {
        warn!("Recovering: brewer reset and forced drain");
        if let Err(err) = self.brewer.reset().await {
            warn!(error = %err, "Brewer reset failed");
        }
        sleep(self.session.recovery_pause).await;
        if let Some(coupling) = self.coupling.as_mut() {
            drain(&mut coupling.reader, &mut coupling.pump, &self.drain).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, mut run: BrewRun) -> AppResult<BrewOutcome> {
        run.finished_at = Some(epoch_seconds());
        let stem = self.storage.write_run(&run, &self.schema)?;
        if let Some(coupling) = self.coupling.as_mut() {
            self.storage.write_mass(&stem, &run.mass_samples)?;
            coupling.reader.disable_continuous().await?;
        }

        info!(
            samples = run.samples.len(),
            mass_samples = run.mass_samples.len(),
            duration = ?run.duration(),
            "Brew complete"
        );
        run.success = true;
        run.stem = Some(stem);
        Ok(BrewOutcome::Completed(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockAdapter, MockLine};
    use crate::config::BrewerCommands;
    use crate::session::interlock::HysteresisInterlock;
    use tracing_test::traced_test;

    const ROW: &str = "1,10.0,20.0";

    fn schema() -> TelemetrySchema {
        TelemetrySchema::new(["NOTES", "a", "b"].map(String::from).to_vec(), ',')
    }

    fn params() -> BrewParams {
        BrewParams {
            flow_rate: 9.0,
            size: 4.0,
            temperature: 195.0,
        }
    }

    fn base_session(brewer: &MockAdapter, dir: &std::path::Path) -> BrewSession {
        BrewSession::new(
            Brewer::new(Box::new(brewer.clone()), BrewerCommands::default()),
            schema(),
            RunStorage::new(dir),
            SessionConfig::default(),
            DrainConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_stream_ends_run() {
        let dir = tempfile::tempdir().unwrap();
        let brewer = MockAdapter::new("brewer");
        brewer.push_line(ROW);
        brewer.push_line("heater warming");
        brewer.push_line(ROW);

        let mut session = base_session(&brewer, dir.path());
        let started = Instant::now();
        let outcome = session.run(&params(), 2).await.unwrap();

        let run = outcome.run().unwrap();
        assert_eq!(run.samples.len(), 2);
        assert_eq!(run.samples[0].values, vec![10.0, 20.0]);
        assert_eq!(run.cycle, 2);
        assert!(run.success);
        assert!(started.elapsed() > Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(
            session.state(),
            SessionState::Terminated(Termination::Success)
        );
        assert_eq!(brewer.sent(), vec!["brew 195 4 9"]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_silence_before_first_sample_is_no_brew() {
        let dir = tempfile::tempdir().unwrap();
        let brewer = MockAdapter::new("brewer");

        let mut session = base_session(&brewer, dir.path());
        let outcome = session.run(&params(), 0).await.unwrap();

        assert!(matches!(outcome, BrewOutcome::NoBrew));
        assert_eq!(
            session.state(),
            SessionState::Terminated(Termination::NoData)
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(logs_contain("No brew"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_faults_are_logged_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let brewer = MockAdapter::new("brewer");
        brewer.push_line(ROW);
        brewer.push(MockLine::Fault);
        brewer.push_line(ROW);

        let mut session = base_session(&brewer, dir.path());
        let outcome = session.run(&params(), 0).await.unwrap();
        assert_eq!(outcome.run().unwrap().samples.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_storm_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let brewer = MockAdapter::new("brewer");
        for _ in 0..5 {
            brewer.push(MockLine::Fault);
        }

        let mut session = base_session(&brewer, dir.path());
        session.session.max_consecutive_faults = 5;
        let err = session.run(&params(), 0).await.unwrap_err();
        assert!(matches!(err, BenchError::Instrument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coupled_tick_polls_scale_before_brewer() {
        let dir = tempfile::tempdir().unwrap();
        let brewer = MockAdapter::new("brewer");
        let scale = MockAdapter::new("scale");
        let pump = MockAdapter::new("pump");
        brewer.push_line(ROW);
        scale.push_chunk("380.0 g\r\n");

        let coupling = ScaleCoupling::new(
            MassReader::new(Box::new(scale.clone()), Duration::from_millis(500)),
            PumpController::new(Box::new(pump.clone()), "pump {setpoint}"),
            Box::new(HysteresisInterlock::new(370.0, 200.0, 10)),
            1000.0,
        );
        let mut session = base_session(&brewer, dir.path()).with_coupling(coupling);
        assert_eq!(session.inactivity_budget(), Duration::from_secs(20));

        let mut run = BrewRun::new(params(), 0);
        session.state = SessionState::Streaming;
        let tick = session.tick(&mut run).await.unwrap();

        assert_eq!(tick, Tick::Sample);
        assert_eq!(run.mass_samples.len(), 1);
        assert_eq!(run.mass_samples[0].mass, 380.0);
        assert_eq!(pump.sent(), vec!["pump 1000"]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_pump_transition_is_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let brewer = MockAdapter::new("brewer");
        let scale = MockAdapter::new("scale");
        let pump = MockAdapter::new("pump");
        brewer.push_line(ROW);
        brewer.push_line(ROW);
        scale.push_chunk("380.0 g\r\n");
        scale.push_chunk("385.0 g\r\n");

        let coupling = ScaleCoupling::new(
            MassReader::new(Box::new(scale.clone()), Duration::from_millis(500)),
            PumpController::new(Box::new(pump.clone()), "pump {setpoint}"),
            Box::new(HysteresisInterlock::new(370.0, 200.0, 10)),
            1000.0,
        );
        let mut session = base_session(&brewer, dir.path()).with_coupling(coupling);
        let mut run = BrewRun::new(params(), 0);
        session.tick(&mut run).await.unwrap();
        session.tick(&mut run).await.unwrap();

        assert_eq!(run.mass_samples.len(), 2);
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("Pump on")).count() {
                1 => Ok(()),
                n => Err(format!("expected one pump-on log, got {n}")),
            }
        });
    }
}
