//! Core library for the brew_bench application.
//!
//! Drives a coffee brewer, an electronic scale and a drain pump over serial
//! links to run parameterized brew experiments. Each brew is captured by a
//! [`session::BrewSession`] polling loop, which optionally couples the scale to
//! the pump through a mass interlock, and is persisted as CSV plus a JSON
//! summary. A [`runner::TestPlanRunner`] works through a [`plan::TestPlan`] of
//! such brews.

pub mod acquisition;
pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod plan;
pub mod runner;
pub mod session;
