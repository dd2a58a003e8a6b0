//! Brew session behaviour against scripted devices
//!
//! Time is paused: every silent poll advances the clock by exactly one poll
//! interval, so inactivity budgets can be asserted precisely.

use brew_bench::adapters::{MockAdapter, MockLine};
use brew_bench::config::{BrewerCommands, DrainConfig, SessionConfig, Settings};
use brew_bench::instrument::{Brewer, MassReader, PumpController};
use brew_bench::session::{
    BrewOutcome, BrewParams, BrewSession, HysteresisInterlock, RunStorage, ScaleCoupling,
    SessionState, TelemetrySchema, Termination,
};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

const FULL_ROW: &str =
    "1,10.0,20.0,0.1,15.0,199.0,5.0,5.0,195.0,50.0,5.0,0.0,0.0,12.0,1.0,195.0,8.0";

fn params() -> BrewParams {
    BrewParams {
        flow_rate: 9.0,
        size: 4.0,
        temperature: 195.0,
    }
}

fn session(brewer: &MockAdapter, schema: TelemetrySchema, dir: &Path) -> BrewSession {
    BrewSession::new(
        Brewer::new(Box::new(brewer.clone()), BrewerCommands::default()),
        schema,
        RunStorage::new(dir),
        SessionConfig::default(),
        DrainConfig::default(),
    )
}

fn small_schema() -> TelemetrySchema {
    TelemetrySchema::new(["NOTES", "a", "b"].map(String::from).to_vec(), ',')
}

fn coupling(scale: &MockAdapter, pump: &MockAdapter) -> ScaleCoupling {
    ScaleCoupling::new(
        MassReader::new(Box::new(scale.clone()), Duration::from_millis(500)),
        PumpController::new(Box::new(pump.clone()), "pump {setpoint}"),
        Box::new(HysteresisInterlock::new(370.0, 200.0, 10)),
        1000.0,
    )
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_full_schema_row_is_persisted_after_inactivity() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default();
    let brewer = MockAdapter::new("brewer");
    brewer.push_line(FULL_ROW);

    let mut session = session(
        &brewer,
        TelemetrySchema::from_config(&settings.brewer.telemetry),
        dir.path(),
    );
    let started = Instant::now();
    let outcome = session.run(&params(), 4).await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed > Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(10_100), "{elapsed:?}");
    assert_eq!(session.state(), SessionState::Terminated(Termination::Success));

    let run = outcome.run().unwrap();
    assert_eq!(run.samples.len(), 1);
    assert_eq!(run.samples[0].values.len(), 16);
    assert_eq!(run.samples[0].values[0], 10.0);
    assert_eq!(run.samples[0].values[15], 8.0);

    let files = files_in(dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("_temp-195_size-4_flow_rate-9_cycle-4.csv"));

    let text = std::fs::read_to_string(dir.path().join(&files[0])).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("NOTES,Predicted_Temp"));
    assert!(lines.next().unwrap().ends_with(",195,8"));
}

#[tokio::test(start_paused = true)]
async fn test_no_activity_reports_no_brew_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let brewer = MockAdapter::new("brewer");

    let mut session = session(&brewer, small_schema(), dir.path());
    let started = Instant::now();
    let outcome = session.run(&params(), 0).await.unwrap();

    assert!(matches!(outcome, BrewOutcome::NoBrew));
    assert!(started.elapsed() > Duration::from_secs(120));
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_lines_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let schema = TelemetrySchema::new(
        ["NOTES", "a", "b", "c", "d", "e"].map(String::from).to_vec(),
        ',',
    );
    let brewer = MockAdapter::new("brewer");
    brewer.push_line("1,1,2,3,4,5");
    brewer.push_line("INFO,1,2,3");
    brewer.push_line("2,1,2,3,4,heater");
    brewer.push_line("3,1,2,3,4,5,6");
    brewer.push_line("4,5,4,3,2,1");

    let mut session = session(&brewer, schema, dir.path());
    let outcome = session.run(&params(), 0).await.unwrap();

    let run = outcome.run().unwrap();
    assert_eq!(run.samples.len(), 2);
    assert_eq!(run.samples[1].values, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_diagnostic_line_extends_the_brew() {
    let dir = tempfile::tempdir().unwrap();
    let brewer = MockAdapter::new("brewer");
    brewer.push_line("1,10.0,20.0");
    brewer.push_silence(900);
    brewer.push_line("Flow steady");
    brewer.push_silence(900);

    let mut session = session(&brewer, small_schema(), dir.path());
    let started = Instant::now();
    let outcome = session.run(&params(), 0).await.unwrap();

    // 9 s of silence, a diagnostic, then a full budget of silence
    let elapsed = started.elapsed();
    assert!(elapsed > Duration::from_secs(19), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(19_100), "{elapsed:?}");
    assert_eq!(outcome.run().unwrap().samples.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interlock_switches_pump_once_each_way() {
    let dir = tempfile::tempdir().unwrap();
    let brewer = MockAdapter::new("brewer");
    let scale = MockAdapter::new("scale");
    let pump = MockAdapter::new("pump");

    let masses = [380.0, 100.0, 95.0, 90.0, 85.0, 80.0, 75.0, 70.0, 65.0, 60.0, 55.0];
    for (i, mass) in masses.iter().enumerate() {
        scale.push_chunk(format!("{mass:.1} g\r\n"));
        brewer.push_line(format!("{i},10.0,20.0"));
    }

    let mut session =
        session(&brewer, small_schema(), dir.path()).with_coupling(coupling(&scale, &pump));
    let started = Instant::now();
    let outcome = session.run(&params(), 1).await.unwrap();

    assert!(started.elapsed() > Duration::from_secs(20));
    assert_eq!(pump.sent(), vec!["pump 1000", "pump 0"]);
    assert_eq!(scale.sent(), vec!["CA", "0A"]);

    let run = outcome.run().unwrap();
    assert_eq!(run.samples.len(), masses.len());
    assert_eq!(run.mass_samples.len(), masses.len());
    assert_eq!(run.mass_samples[0].mass, 380.0);

    let files = files_in(dir.path());
    assert_eq!(files.len(), 2);
    let mass_file = files.iter().find(|f| f.ends_with("_mass.csv")).unwrap();
    let text = std::fs::read_to_string(dir.path().join(mass_file)).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "time,mass");
    assert_eq!(lines.len(), masses.len() + 1);
    assert!(lines[1].ends_with(",380"));
}

#[tokio::test(start_paused = true)]
async fn test_fault_in_coupled_brew_resets_and_drains() {
    let dir = tempfile::tempdir().unwrap();
    let brewer = MockAdapter::new("brewer");
    let scale = MockAdapter::new("scale");
    let pump = MockAdapter::new("pump");
    scale.set_idle_chunk("0.0 g\r\n");
    brewer.push_line("1,10.0,20.0");
    brewer.push(MockLine::Fault);
    brewer.push_line("2,11.0,21.0");

    let mut session =
        session(&brewer, small_schema(), dir.path()).with_coupling(coupling(&scale, &pump));
    let outcome = session.run(&params(), 0).await.unwrap();

    assert_eq!(brewer.sent(), vec!["brew 195 4 9", "reset"]);
    assert_eq!(pump.sent(), vec!["pump 1000", "pump 0"]);
    // drain leaves continuous mode off; the next tick turns it back on
    assert_eq!(scale.sent(), vec!["CA", "0A", "CA", "0A"]);
    assert_eq!(outcome.run().unwrap().samples.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_drain_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let brewer = MockAdapter::new("brewer");
    let scale = MockAdapter::new("scale");
    let pump = MockAdapter::new("pump");
    brewer.push_line("1,10.0,20.0");
    brewer.push(MockLine::Fault);
    // scale never answers

    let mut session =
        session(&brewer, small_schema(), dir.path()).with_coupling(coupling(&scale, &pump));
    let err = session.run(&params(), 0).await.unwrap_err();

    assert!(matches!(err, brew_bench::error::BenchError::ScaleUnresponsive));
    assert_eq!(pump.sent().last().map(String::as_str), Some("pump 0"));
    assert!(files_in(dir.path()).is_empty());
}
