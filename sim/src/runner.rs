//! Synchronous scenario runner: drives the real decoder, clusterer, and
//! tracking tick frame by frame, without the stage threads, so results are
//! exactly reproducible.

use crate::encode::encode_frame;
use crate::radar_sim::RadarSimulator;
use crate::scenarios::Scenario;
use radar_core::clustering::DbscanClusterer;
use radar_core::decode::FrameDecoder;
use radar_core::error::RadarError;
use radar_core::pipeline::TrackingPipeline;
use radar_core::stats::PipelineStats;
use radar_core::track_manager::TrackManager;
use radar_core::types::{FrameClusters, RawFrame, TrackFrame};
use std::sync::Arc;

/// All per-frame publications of one scenario run.
pub struct ScenarioRun {
    pub frames: Vec<TrackFrame>,
}

impl ScenarioRun {
    pub fn last(&self) -> &TrackFrame {
        self.frames.last().expect("scenario produced no frames")
    }
}

/// Run a scenario through the full processing chain and collect every
/// published track frame.
pub fn run_scenario(scenario: &Scenario) -> Result<ScenarioRun, RadarError> {
    scenario.config.validate()?;
    let config = Arc::new(scenario.config.clone());
    let stats = Arc::new(PipelineStats::new());
    let manager = Arc::new(TrackManager::new(
        config.algorithms.management.clone(),
        config.volume.clone(),
        config.system.max_tracks,
        stats.clone(),
    ));
    let tracking = TrackingPipeline::new(config.clone(), manager, stats.clone());
    let clusterer = DbscanClusterer::new(config.algorithms.clustering.clone());
    let mut decoder = FrameDecoder::new();
    let mut sim = RadarSimulator::new(scenario.radar.clone(), scenario.seed);
    let mut targets = scenario.targets.clone();

    let dt = 1.0 / scenario.frame_rate_hz;
    let n_frames = scenario.frame_count();
    let mut frames = Vec::with_capacity(n_frames as usize);

    for seq in 0..n_frames {
        let t = seq as f64 * dt;
        let arrival_ns = (t * 1e9) as i64;

        let in_dropout = scenario
            .dropout_frames
            .is_some_and(|(a, b)| seq >= a && seq <= b);
        let returns = if in_dropout {
            Vec::new()
        } else {
            sim.observe(&targets, t)
        };

        let out = decoder.decode(&RawFrame {
            arrival_ns,
            bytes: encode_frame(seq, &returns),
        });
        if out.error.is_some() {
            PipelineStats::incr(&stats.decode_errors);
        }
        PipelineStats::incr(&stats.frames_received);
        PipelineStats::add(&stats.detections_processed, out.frame.detections.len() as u64);

        let clusters = clusterer.cluster(&out.frame.detections);
        PipelineStats::add(&stats.clusters_formed, clusters.len() as u64);

        frames.push(tracking.tick(&FrameClusters {
            seq,
            arrival_ns,
            clusters,
            detections: out.frame.detections,
        }));

        for target in &mut targets {
            target.step(dt);
        }
    }

    Ok(ScenarioRun { frames })
}
