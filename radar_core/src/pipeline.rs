//! The tracking-stage tick: the full associate + filter + manage cycle for
//! one frame of clusters.
//!
//! # Processing steps per frame
//! 1. Predict all live tracks to the frame timestamp (parallel)
//! 2. Gate every track x cluster pair (Mahalanobis, parallel over tracks)
//! 3. Partition the gate graph into connected components
//! 4. Solve each component with the Hungarian algorithm
//! 5. KF-update matched tracks, register hits
//! 6. Register misses for unmatched tracks
//! 7. Birth tentative tracks from unassigned clusters
//! 8. End-of-frame sweep (quality floor, coast timeout) + cleanup
//! 9. Emit the whole-frame atomic `TrackFrame`
//!
//! The track table lock is held across one tick, so mutations for frame N
//! complete before frame N+1 begins and downstream snapshots never observe
//! a partial frame.

use crate::association::{associate, association_probability, BipartiteGraph};
use crate::config::Config;
use crate::gating::{mahalanobis_gate, GateThresholds};
use crate::kf::CaKalmanFilter;
use crate::math::cartesian_to_spherical;
use crate::stats::PipelineStats;
use crate::track_manager::TrackManager;
use crate::types::{
    BeamRequest, Cluster, DVec, FrameClusters, TrackFrame, TrackId, TrackState, TrackingMode,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Confidence blend factor on hit and decay factor on miss.
const CONFIDENCE_BLEND: f64 = 0.1;
const CONFIDENCE_DECAY: f64 = 0.95;

/// Dwell time requested per confirmed track in BEAM_REQUEST mode.
const BEAM_DWELL_MS: f64 = 20.0;

/// The tracking stage. Holds the filter, gate thresholds, and a handle to
/// the managed track table.
pub struct TrackingPipeline {
    config: Arc<Config>,
    kf: CaKalmanFilter,
    gates: GateThresholds,
    manager: Arc<TrackManager>,
    stats: Arc<PipelineStats>,
    /// Must exceed any feasible gate cost so the padded assignment never
    /// prefers a dummy over a feasible pair
    dummy_cost: f64,
}

impl TrackingPipeline {
    pub fn new(config: Arc<Config>, manager: Arc<TrackManager>, stats: Arc<PipelineStats>) -> Self {
        let gates = GateThresholds::from_probability(config.algorithms.association.validation_gate);
        let kf = CaKalmanFilter::new(config.algorithms.tracking.clone());
        let dummy_cost = 4.0 * gates.position_velocity.max(gates.position);
        Self {
            config,
            kf,
            gates,
            manager,
            stats,
            dummy_cost,
        }
    }

    pub fn manager(&self) -> &Arc<TrackManager> {
        &self.manager
    }

    /// Process one frame of clusters and emit the published track frame.
    pub fn tick(&self, frame: &FrameClusters) -> TrackFrame {
        let now_ns = frame.arrival_ns;
        let snr_ref = self.config.algorithms.clustering.snr_ref;
        let max_dt = self.config.algorithms.tracking.max_dt;

        let mut table = self.manager.begin_frame();

        // ----------------------------------------------------------------
        // Step 1: predict all live tracks to the frame timestamp
        // ----------------------------------------------------------------
        let kf = &self.kf;
        let degraded_predictions: u64 = table
            .iter_mut()
            .par_bridge()
            .map(|track| {
                if !track.is_active() {
                    return 0u64;
                }
                let mut dt = (now_ns - track.predicted_ns) as f64 * 1e-9;
                let mut clamped = false;
                if dt < 0.0 || dt > max_dt {
                    dt = max_dt;
                    clamped = true;
                }
                if dt > 0.0 {
                    let (state, cov) = kf.predict(&track.state, &track.cov, dt);
                    track.state = state;
                    track.cov = cov;
                }
                track.predicted_ns = now_ns;
                if clamped {
                    track.degraded = true;
                    1
                } else {
                    0
                }
            })
            .sum();
        PipelineStats::add(&self.stats.degraded_predictions, degraded_predictions);

        // Deterministic track ordering for gating and assignment indices.
        let track_ids = table.active_sorted();
        let n_tracks = track_ids.len();
        let n_clusters = frame.clusters.len();

        // ----------------------------------------------------------------
        // Step 2: gate every track x cluster pair (parallel over tracks)
        // ----------------------------------------------------------------
        struct TrackGates {
            edges: Vec<(usize, usize, f64)>, // (ti, ci, d2)
        }

        let track_refs: Vec<&crate::track::Track> = track_ids
            .iter()
            .map(|id| table.get(*id).expect("active id present"))
            .collect();

        let measurements: Vec<Measurement> = frame
            .clusters
            .iter()
            .map(|c| self.measurement_for(c, snr_ref))
            .collect();

        let gate_results: Vec<TrackGates> = track_refs
            .par_iter()
            .enumerate()
            .map(|(ti, track)| {
                let mut res = TrackGates { edges: Vec::new() };
                for (ci, m) in measurements.iter().enumerate() {
                    let gate = mahalanobis_gate(
                        &track.state,
                        &track.cov,
                        &m.z,
                        &m.h,
                        &m.r,
                        self.gates.for_dim(m.z.len()),
                    );
                    if gate.passes {
                        res.edges.push((ti, ci, gate.d2));
                    }
                }
                res
            })
            .collect();

        let mut graph = BipartiteGraph::new(n_tracks, n_clusters);
        let mut d2_by_track: HashMap<usize, Vec<f64>> = HashMap::new();
        let mut d2_of_pair: HashMap<(usize, usize), f64> = HashMap::new();
        for res in gate_results {
            for (ti, ci, d2) in res.edges {
                graph.add_edge(ti, ci, d2);
                d2_by_track.entry(ti).or_default().push(d2);
                d2_of_pair.insert((ti, ci), d2);
            }
        }
        drop(track_refs);

        // ----------------------------------------------------------------
        // Steps 3-4: components + Hungarian
        // ----------------------------------------------------------------
        let assignment = associate(&graph, self.dummy_cost);

        // ----------------------------------------------------------------
        // Step 5: KF update for matched pairs
        // ----------------------------------------------------------------
        let mgmt = self.manager.config().clone();
        for &(ti, ci) in &assignment.pairs {
            let id = track_ids[ti];
            let cluster = &frame.clusters[ci];
            let m = &measurements[ci];
            let track = table.get_mut(id).expect("matched id present");

            match self.kf.update(&track.state, &track.cov, &m.z, &m.h, &m.r) {
                Some(update) => {
                    track.state = update.state;
                    track.cov = update.cov;
                    let innov_pos = DVec::from_iterator(3, update.innovation.iter().take(3).copied());
                    track.push_innovation(innov_pos.norm(), mgmt.history_len);
                }
                None => {
                    // Degenerate gate: keep the prediction, degrade.
                    track.degraded = true;
                    PipelineStats::incr(&self.stats.degenerate_updates);
                    tracing::debug!(track = %track.id, "degenerate innovation covariance; update skipped");
                }
            }

            let d2 = d2_of_pair.get(&(ti, ci)).copied().unwrap_or(f64::INFINITY);
            let p_assoc = association_probability(
                d2,
                d2_by_track.get(&ti).map(Vec::as_slice).unwrap_or(&[]),
                self.config.algorithms.association.clutter_density,
            );
            track.confidence = ((1.0 - CONFIDENCE_BLEND) * track.confidence
                + CONFIDENCE_BLEND * p_assoc * cluster.confidence)
                .clamp(0.0, 1.0);

            for det in &cluster.detections {
                track.push_detection(det.clone(), mgmt.history_len);
            }
            track.push_trajectory(mgmt.trajectory_len);
            self.manager.register_hit(track, now_ns);
        }

        // ----------------------------------------------------------------
        // Step 6: misses for unmatched tracks
        // ----------------------------------------------------------------
        for &ti in &assignment.unmatched_tracks {
            let id = track_ids[ti];
            if let Some(track) = table.get_mut(id) {
                track.confidence *= CONFIDENCE_DECAY;
                track.push_trajectory(mgmt.trajectory_len);
                self.manager.register_miss(track, now_ns);
            }
        }

        // ----------------------------------------------------------------
        // Step 7: births from unassigned clusters
        // ----------------------------------------------------------------
        for &ci in &assignment.unmatched_clusters {
            let cluster = &frame.clusters[ci];
            let (state, cov) = self.kf.init_from_cluster(cluster);
            self.manager.birth(&mut table, cluster, state, cov, now_ns);
        }

        // ----------------------------------------------------------------
        // Step 8: end-of-frame sweep + cleanup
        // ----------------------------------------------------------------
        self.manager.end_of_frame(&mut table, now_ns);
        self.manager.cleanup(&mut table, now_ns);

        // ----------------------------------------------------------------
        // Step 9: whole-frame atomic output
        // ----------------------------------------------------------------
        let mut records: Vec<_> = table
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.to_record())
            .collect();
        records.sort_unstable_by_key(|r| r.track_id);

        let beam_requests = if self.config.system.tracking_mode == TrackingMode::BeamRequest {
            self.beam_requests(&table, now_ns)
        } else {
            Vec::new()
        };

        let active = table.active_count() as u32;
        drop(table);

        TrackFrame {
            seq: frame.seq,
            arrival_ns: frame.arrival_ns,
            tracks: records,
            detections: self
                .config
                .pipeline
                .publish_detections
                .then(|| frame.detections.clone()),
            clusters: self
                .config
                .pipeline
                .publish_clusters
                .then(|| frame.clusters.clone()),
            beam_requests,
            stats: self.stats.snapshot(active),
        }
    }

    /// Build the measurement vector/model for one cluster: position-only,
    /// or position + velocity when the cluster's mean SNR is high enough.
    fn measurement_for(&self, cluster: &Cluster, snr_ref: f64) -> Measurement {
        let snr = cluster.mean_snr();
        if self.kf.use_velocity_measurement(snr) {
            let mut z = DVec::zeros(6);
            for i in 0..3 {
                z[i] = cluster.centroid[i];
                z[i + 3] = cluster.mean_velocity[i];
            }
            Measurement {
                z,
                h: CaKalmanFilter::h_position_velocity(),
                r: self.kf.r_position_velocity(snr, snr_ref),
            }
        } else {
            let z = DVec::from_iterator(3, cluster.centroid.iter().copied());
            Measurement {
                z,
                h: CaKalmanFilter::h_position(),
                r: self.kf.r_position(snr, snr_ref),
            }
        }
    }

    /// Dedicated-beam dwell requests for every confirmed track.
    fn beam_requests(
        &self,
        table: &crate::track_manager::TrackTable,
        now_ns: i64,
    ) -> Vec<BeamRequest> {
        let mut ids: Vec<TrackId> = table
            .iter()
            .filter(|t| t.lifecycle == TrackState::Confirmed)
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let track = table.get(*id).expect("confirmed id present");
                let (_, azimuth, elevation) = cartesian_to_spherical(&track.position());
                BeamRequest {
                    beam_id: i as u32,
                    azimuth,
                    elevation,
                    dwell_time_ms: BEAM_DWELL_MS,
                    track_id: id.0,
                    request_ns: now_ns,
                }
            })
            .collect()
    }
}

/// Per-cluster measurement model, precomputed once per frame.
struct Measurement {
    z: DVec,
    h: crate::types::DMat,
    r: crate::types::DMat,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, DetectionId, Vec3};

    fn pipeline(config: Config) -> TrackingPipeline {
        let config = Arc::new(config);
        let stats = Arc::new(PipelineStats::new());
        let manager = Arc::new(TrackManager::new(
            config.algorithms.management.clone(),
            config.volume.clone(),
            config.system.max_tracks,
            stats.clone(),
        ));
        TrackingPipeline::new(config, manager, stats)
    }

    fn det(id: u64, pos: Vec3, t_ns: i64) -> Detection {
        let (range, azimuth, elevation) = cartesian_to_spherical(&pos);
        Detection {
            id: DetectionId(id),
            position: pos,
            velocity: Vec3::new(100.0, 0.0, 0.0),
            range,
            azimuth,
            elevation,
            snr: 18.0,
            rcs: 1.0,
            beam_id: 0,
            timestamp_ns: t_ns,
        }
    }

    fn cluster_at(id: u32, pos: Vec3, t_ns: i64) -> Cluster {
        let detections = vec![
            det(id as u64 * 10, pos, t_ns),
            det(id as u64 * 10 + 1, pos + Vec3::new(5.0, 0.0, 0.0), t_ns),
            det(id as u64 * 10 + 2, pos + Vec3::new(-5.0, 0.0, 0.0), t_ns),
        ];
        Cluster {
            cluster_id: id,
            detections,
            centroid: pos,
            mean_velocity: Vec3::new(100.0, 0.0, 0.0),
            confidence: 0.7,
            density: 1.0,
        }
    }

    fn frame(seq: u64, t_ns: i64, positions: &[Vec3]) -> FrameClusters {
        let clusters = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| cluster_at(i as u32, p, t_ns))
            .collect();
        FrameClusters {
            seq,
            arrival_ns: t_ns,
            clusters,
            detections: Vec::new(),
        }
    }

    const SEC: i64 = 1_000_000_000;

    #[test]
    fn births_then_absorbs() {
        let p = pipeline(Config::default());
        let out1 = p.tick(&frame(0, 0, &[Vec3::new(10_000.0, 0.0, 1000.0)]));
        assert_eq!(out1.tracks.len(), 1);
        assert_eq!(out1.tracks[0].state, TrackState::Tentative);

        // Second frame 100 ms later, target moved ~10 m: the existing
        // track must absorb the cluster rather than spawn a second one.
        let out2 = p.tick(&frame(1, SEC / 10, &[Vec3::new(10_010.0, 0.0, 1000.0)]));
        assert_eq!(out2.tracks.len(), 1);
        assert_eq!(out2.tracks[0].track_id, out1.tracks[0].track_id);
        assert_eq!(out2.tracks[0].hit_count, 2);
    }

    #[test]
    fn confirmation_after_enough_hits() {
        let p = pipeline(Config::default());
        let mut confirmed_at = None;
        for i in 0..6i64 {
            let x = 10_000.0 + 10.0 * i as f64;
            let out = p.tick(&frame(i as u64, i * SEC / 10, &[Vec3::new(x, 0.0, 1000.0)]));
            if out.tracks.first().map(|t| t.state) == Some(TrackState::Confirmed)
                && confirmed_at.is_none()
            {
                confirmed_at = Some(i);
            }
        }
        // confirmation_threshold = 3 hits (birth + 2)
        assert_eq!(confirmed_at, Some(2));
    }

    #[test]
    fn missed_frame_increments_misses() {
        let p = pipeline(Config::default());
        p.tick(&frame(0, 0, &[Vec3::new(10_000.0, 0.0, 1000.0)]));
        let out = p.tick(&frame(1, SEC / 10, &[]));
        assert_eq!(out.tracks.len(), 1);
        assert_eq!(out.tracks[0].consecutive_misses, 1);
    }

    #[test]
    fn two_targets_two_tracks_no_swap() {
        let p = pipeline(Config::default());
        let a0 = Vec3::new(-20_000.0, 0.0, 2000.0);
        let b0 = Vec3::new(20_000.0, 0.0, 2500.0);
        let mut id_a = None;
        let mut id_b = None;
        for i in 0..20i64 {
            let t = i * SEC / 10;
            let a = a0 + Vec3::new(20.0 * i as f64, 0.0, 0.0);
            let b = b0 + Vec3::new(-18.0 * i as f64, 0.0, 0.0);
            let out = p.tick(&frame(i as u64, t, &[a, b]));
            assert_eq!(out.tracks.len(), 2, "frame {i}");
            // the targets stay in separate half-planes for the whole run,
            // so the x sign identifies them
            for tr in &out.tracks {
                if tr.position.0 < 0.0 {
                    match id_a {
                        None => id_a = Some(tr.track_id),
                        Some(prev) => assert_eq!(prev, tr.track_id, "west target swapped"),
                    }
                } else {
                    match id_b {
                        None => id_b = Some(tr.track_id),
                        Some(prev) => assert_eq!(prev, tr.track_id, "east target swapped"),
                    }
                }
            }
        }
        assert!(id_a.is_some() && id_b.is_some());
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn track_cap_never_exceeded() {
        let mut cfg = Config::default();
        cfg.system.max_tracks = 3;
        let p = pipeline(cfg);
        for i in 0..5i64 {
            let t = i * SEC / 10;
            let positions: Vec<Vec3> = (0..8)
                .map(|k| Vec3::new(5_000.0 + 10_000.0 * k as f64, 4_000.0 * k as f64, 1000.0))
                .collect();
            let out = p.tick(&frame(i as u64, t, &positions));
            assert!(out.tracks.len() <= 3, "cap violated at frame {i}");
            assert!(out.stats.active_tracks <= 3);
        }
    }

    #[test]
    fn beam_requests_only_in_beam_mode() {
        let mut cfg = Config::default();
        cfg.system.tracking_mode = TrackingMode::BeamRequest;
        let p = pipeline(cfg);
        let mut last = None;
        for i in 0..4i64 {
            let x = 10_000.0 + 10.0 * i as f64;
            last = Some(p.tick(&frame(i as u64, i * SEC / 10, &[Vec3::new(x, 0.0, 1000.0)])));
        }
        let out = last.unwrap();
        assert_eq!(out.tracks[0].state, TrackState::Confirmed);
        assert_eq!(out.beam_requests.len(), 1);
        assert_eq!(out.beam_requests[0].track_id, out.tracks[0].track_id);

        let tws = pipeline(Config::default());
        let mut last = None;
        for i in 0..4i64 {
            let x = 10_000.0 + 10.0 * i as f64;
            last = Some(tws.tick(&frame(i as u64, i * SEC / 10, &[Vec3::new(x, 0.0, 1000.0)])));
        }
        assert!(last.unwrap().beam_requests.is_empty());
    }

    #[test]
    fn output_records_sorted_by_id() {
        let p = pipeline(Config::default());
        let positions: Vec<Vec3> = (0..5)
            .map(|k| Vec3::new(5_000.0 + 10_000.0 * k as f64, 0.0, 1000.0))
            .collect();
        let out = p.tick(&frame(0, 0, &positions));
        let ids: Vec<u32> = out.tracks.iter().map(|t| t.track_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn large_gap_clamps_dt_and_degrades() {
        let mut cfg = Config::default();
        cfg.algorithms.tracking.max_dt = 0.5;
        let p = pipeline(cfg);
        p.tick(&frame(0, 0, &[Vec3::new(10_000.0, 0.0, 1000.0)]));
        // 10 s gap >> max_dt
        let out = p.tick(&frame(1, 10 * SEC, &[Vec3::new(10_050.0, 0.0, 1000.0)]));
        assert!(out.stats.degraded_predictions >= 1);
    }
}
