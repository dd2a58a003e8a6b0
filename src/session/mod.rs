//! Brew sessions and their output
//!
//! - [`telemetry`]: schema and line classification
//! - [`run`]: per-brew data model
//! - [`interlock`]: mass-driven pump rule
//! - [`brew`]: the session state machine
//! - [`drain`]: pump-until-empty routine
//! - [`storage`], [`summary`]: files written per completed run

pub mod brew;
pub mod drain;
pub mod interlock;
pub mod run;
pub mod storage;
pub mod summary;
pub mod telemetry;

pub use brew::{BrewSession, ScaleCoupling, SessionState, Termination};
pub use drain::{drain, wait_for_stability, DrainReport};
pub use interlock::{HysteresisInterlock, PumpAction, PumpInterlock};
pub use run::{BrewOutcome, BrewParams, BrewRun, BrewSample, MassSample};
pub use storage::RunStorage;
pub use summary::RunSummary;
pub use telemetry::{LineKind, TelemetrySchema};
