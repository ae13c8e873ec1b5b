//! Named scenarios: target geometry, radar model, and the engine
//! configuration each one runs against. Deterministic given the seed.

use crate::radar_sim::RadarParams;
use crate::target::{MotionSpec, Target};
use radar_core::config::Config;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One straight-line target, 300 s at 10 Hz
    SingleTarget,
    /// Same target with a detection blackout around frame 50
    MissedDetections,
    /// Two targets crossing head-on at different altitudes
    CrossingTargets,
    /// No targets, ~50 clutter returns per frame
    PureClutter,
    /// 20 well-separated targets against a 10-track cap
    CapacityPressure,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub duration_sec: f64,
    pub frame_rate_hz: f64,
    pub targets: Vec<Target>,
    pub radar: RadarParams,
    /// Engine configuration the scenario runs against
    pub config: Config,
    /// Inclusive frame range during which no returns are delivered
    pub dropout_frames: Option<(u64, u64)>,
}

impl Scenario {
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::SingleTarget => Self::single_target(seed),
            ScenarioKind::MissedDetections => Self::missed_detections(seed),
            ScenarioKind::CrossingTargets => Self::crossing_targets(seed),
            ScenarioKind::PureClutter => Self::pure_clutter(seed),
            ScenarioKind::CapacityPressure => Self::capacity_pressure(seed),
        }
    }

    pub fn frame_count(&self) -> u64 {
        (self.duration_sec * self.frame_rate_hz).round() as u64
    }

    fn base_config(rate_hz: f64) -> Config {
        let mut config = Config::default();
        config.system.update_rate_hz = rate_hz;
        config
    }

    fn single_target(seed: u64) -> Self {
        Scenario {
            name: "single_target".into(),
            seed,
            duration_sec: 300.0,
            frame_rate_hz: 10.0,
            targets: vec![Target::new(
                0,
                [10_000.0, 0.0, 1_000.0],
                [100.0, 50.0, 0.0],
                MotionSpec::ConstantVelocity,
            )],
            radar: RadarParams {
                p_detection: 1.0,
                lambda_clutter: 0.0,
                ..Default::default()
            },
            config: Self::base_config(10.0),
            dropout_frames: None,
        }
    }

    fn missed_detections(seed: u64) -> Self {
        Scenario {
            name: "missed_detections".into(),
            dropout_frames: Some((51, 60)),
            duration_sec: 12.0,
            ..Self::single_target(seed)
        }
    }

    fn crossing_targets(seed: u64) -> Self {
        Scenario {
            name: "crossing_targets".into(),
            seed,
            duration_sec: 300.0,
            frame_rate_hz: 10.0,
            targets: vec![
                Target::new(
                    0,
                    [-30_000.0, 0.0, 2_000.0],
                    [200.0, 0.0, 0.0],
                    MotionSpec::ConstantVelocity,
                ),
                Target::new(
                    1,
                    [30_000.0, 0.0, 2_500.0],
                    [-180.0, 0.0, 0.0],
                    MotionSpec::ConstantVelocity,
                ),
            ],
            radar: RadarParams {
                p_detection: 1.0,
                lambda_clutter: 0.0,
                ..Default::default()
            },
            config: Self::base_config(10.0),
            dropout_frames: None,
        }
    }

    fn pure_clutter(seed: u64) -> Self {
        Scenario {
            name: "pure_clutter".into(),
            seed,
            duration_sec: 60.0,
            frame_rate_hz: 10.0,
            targets: vec![],
            radar: RadarParams {
                lambda_clutter: 50.0,
                ..Default::default()
            },
            config: Self::base_config(10.0),
            dropout_frames: None,
        }
    }

    fn capacity_pressure(seed: u64) -> Self {
        // 20 well-separated targets on a 50 km ring, all inbound.
        let targets = (0..20)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 20.0;
                let r = 50_000.0;
                Target::new(
                    i,
                    [r * angle.cos(), r * angle.sin(), 3_000.0],
                    [-120.0 * angle.cos(), -120.0 * angle.sin(), 0.0],
                    MotionSpec::ConstantVelocity,
                )
            })
            .collect();
        let mut config = Self::base_config(10.0);
        config.system.max_tracks = 10;
        Scenario {
            name: "capacity_pressure".into(),
            seed,
            duration_sec: 15.0,
            frame_rate_hz: 10.0,
            targets,
            radar: RadarParams {
                p_detection: 1.0,
                lambda_clutter: 0.0,
                ..Default::default()
            },
            config,
            dropout_frames: None,
        }
    }
}
