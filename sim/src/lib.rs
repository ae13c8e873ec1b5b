//! `sim` — Offline scenario simulator: ground-truth targets, a radar
//! measurement model, named scenarios, and binary frame encoding, so
//! simulated runs exercise the real decoder and pipeline end to end.

pub mod encode;
pub mod radar_sim;
pub mod runner;
pub mod scenarios;
pub mod target;

pub use radar_sim::{RadarParams, RadarSimulator};
pub use runner::{run_scenario, ScenarioRun};
pub use scenarios::{Scenario, ScenarioKind};
pub use target::{MotionSpec, Target};
