//! Track lifecycle management: birth, confirmation, coasting, termination,
//! quality scoring, capacity eviction, and cleanup.
//!
//! # Lifecycle policy
//! - **Birth**: an unassigned cluster inside the operational volume seeds a
//!   tentative track, subject to the `max_tracks` cap.
//! - **Confirmation**: tentative → confirmed after `confirmation_threshold`
//!   hits.
//! - **Coasting**: confirmed tracks ride out `deletion_threshold`
//!   consecutive misses by prediction alone, and terminate after
//!   `max_coast_time_sec` without re-acquisition.
//! - **Termination** is terminal; terminated tracks are never
//!   re-associated and are removed by cleanup after a retention window.
//!
//! The manager exclusively owns the canonical table. One lock acquisition
//! covers one frame's mutations, so published snapshots are whole-frame
//! atomic.

use crate::config::{ManagementConfig, VolumeConfig};
use crate::stats::PipelineStats;
use crate::track::Track;
use crate::types::{Cluster, StateCov, StateVec, TrackId, TrackState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// The canonical track table. Only reachable through
/// [`TrackManager::begin_frame`] (mutation) and the snapshot accessors.
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: HashMap<TrackId, Track>,
    next_id: u32,
}

impl TrackTable {
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Active = non-terminated.
    pub fn active_count(&self) -> usize {
        self.tracks.values().filter(|t| t.is_active()).count()
    }

    /// Active tracks sorted by id, so per-frame iteration order is
    /// deterministic.
    pub fn active_sorted(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Manages the pool of tracks behind one mutex.
pub struct TrackManager {
    config: ManagementConfig,
    volume: VolumeConfig,
    max_tracks: usize,
    table: Mutex<TrackTable>,
    stats: Arc<PipelineStats>,
}

/// Quality-score shaping constants. The score stays in [0, 1], is monotone
/// non-decreasing in hits and non-increasing in misses.
const QUALITY_HIT_HALF_LIFE: f64 = 3.0;
const QUALITY_INNOV_SCALE: f64 = 500.0;
const QUALITY_TRACE_SCALE: f64 = 1.0e5;
const QUALITY_DEGRADED_PENALTY: f64 = 0.8;

impl TrackManager {
    pub fn new(
        config: ManagementConfig,
        volume: VolumeConfig,
        max_tracks: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            volume,
            max_tracks,
            table: Mutex::new(TrackTable {
                tracks: HashMap::new(),
                next_id: 1,
            }),
            stats,
        }
    }

    pub fn config(&self) -> &ManagementConfig {
        &self.config
    }

    /// Acquire the table for one frame's worth of mutations. Mutations for
    /// frame N complete before frame N+1 begins because the tracking stage
    /// is the single writer and holds this guard across the tick.
    pub fn begin_frame(&self) -> MutexGuard<'_, TrackTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consistent snapshot of all non-terminated tracks. Acquires the lock
    /// briefly and clones.
    pub fn active_tracks(&self) -> Vec<Track> {
        let table = self.begin_frame();
        let mut tracks: Vec<Track> = table.iter().filter(|t| t.is_active()).cloned().collect();
        tracks.sort_unstable_by_key(|t| t.id);
        tracks
    }

    pub fn active_count(&self) -> usize {
        self.begin_frame().active_count()
    }

    // -----------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------

    /// Register an associated hit. Resets the miss counter and advances
    /// confirmation / re-acquisition.
    pub fn register_hit(&self, track: &mut Track, now_ns: i64) {
        debug_assert!(track.is_active(), "terminated track must never be re-associated");
        track.hit_count = track.hit_count.saturating_add(1);
        track.consecutive_misses = 0;
        track.last_update_ns = now_ns;
        match track.lifecycle {
            TrackState::Tentative => {
                if track.hit_count >= self.config.confirmation_threshold {
                    track.lifecycle = TrackState::Confirmed;
                    PipelineStats::incr(&self.stats.tracks_confirmed);
                    tracing::debug!(track = %track.id, hits = track.hit_count, "track confirmed");
                }
            }
            TrackState::Confirmed => {}
            TrackState::Coasting => {
                track.lifecycle = TrackState::Confirmed;
                track.coasting_since_ns = None;
                tracing::debug!(track = %track.id, "track re-acquired from coasting");
            }
            TrackState::Terminated => {}
        }
    }

    /// Register a missed frame.
    pub fn register_miss(&self, track: &mut Track, now_ns: i64) {
        match track.lifecycle {
            TrackState::Tentative => {
                track.consecutive_misses += 1;
                if track.consecutive_misses >= self.config.tentative_deletion() {
                    self.terminate(track, "tentative miss limit");
                }
            }
            TrackState::Confirmed => {
                track.consecutive_misses += 1;
                if track.consecutive_misses >= self.config.deletion_threshold {
                    track.lifecycle = TrackState::Coasting;
                    track.coasting_since_ns = Some(now_ns);
                    tracing::debug!(track = %track.id, "track coasting");
                }
            }
            TrackState::Coasting => {
                track.consecutive_misses += 1;
            }
            TrackState::Terminated => {}
        }
    }

    fn terminate(&self, track: &mut Track, reason: &str) {
        if track.lifecycle == TrackState::Terminated {
            return;
        }
        track.lifecycle = TrackState::Terminated;
        PipelineStats::incr(&self.stats.tracks_terminated);
        tracing::debug!(track = %track.id, reason, "track terminated");
    }

    /// End-of-frame sweep: recompute quality, apply the quality floor to
    /// tentative/coasting tracks, and expire coast timeouts.
    pub fn end_of_frame(&self, table: &mut TrackTable, now_ns: i64) {
        let max_coast_ns = (self.config.max_coast_time_sec * 1e9) as i64;
        for track in table.iter_mut() {
            if !track.is_active() {
                continue;
            }
            track.quality_score = self.score_quality(track);
            match track.lifecycle {
                TrackState::Coasting => {
                    let coast_elapsed = track
                        .coasting_since_ns
                        .map(|t0| now_ns - t0)
                        .unwrap_or(0);
                    if coast_elapsed > max_coast_ns {
                        self.terminate(track, "coast timeout");
                    } else if track.quality_score < self.config.quality_threshold {
                        self.terminate(track, "quality floor");
                    }
                }
                TrackState::Tentative => {
                    if track.quality_score < self.config.quality_threshold {
                        self.terminate(track, "quality floor");
                    }
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------
    // Birth policy
    // -----------------------------------------------------------------

    /// Seed a tentative track from an unassigned cluster. Returns the new
    /// id, or `None` when the centroid lies outside the operational volume
    /// or the capacity policy drops the birth.
    pub fn birth(
        &self,
        table: &mut TrackTable,
        cluster: &Cluster,
        state: StateVec,
        cov: StateCov,
        now_ns: i64,
    ) -> Option<TrackId> {
        if !self.volume.contains(&cluster.centroid) {
            return None;
        }

        if table.active_count() >= self.max_tracks {
            // Evict the lowest-quality tentative track; otherwise drop.
            let victim = table
                .iter()
                .filter(|t| t.lifecycle == TrackState::Tentative)
                .min_by(|a, b| {
                    a.quality_score
                        .partial_cmp(&b.quality_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.id.cmp(&a.id))
                })
                .map(|t| t.id);
            match victim {
                Some(id) => {
                    if let Some(t) = table.get_mut(id) {
                        self.terminate(t, "evicted for capacity");
                    }
                    PipelineStats::incr(&self.stats.evictions);
                }
                None => {
                    PipelineStats::incr(&self.stats.births_dropped);
                    tracing::debug!(max_tracks = self.max_tracks, "birth dropped at capacity");
                    return None;
                }
            }
        }

        let id = TrackId(table.next_id);
        table.next_id += 1;
        let mut track = Track::new(id, state, cov, now_ns);
        track.confidence = cluster.confidence;
        track.quality_score = self.score_quality(&track);
        table.tracks.insert(id, track);
        PipelineStats::incr(&self.stats.tracks_created);
        Some(id)
    }

    // -----------------------------------------------------------------
    // Quality
    // -----------------------------------------------------------------

    /// Smooth quality score in [0, 1]: rises with hits, falls with misses,
    /// mean innovation magnitude, and covariance trace; penalized while
    /// degraded.
    pub fn score_quality(&self, track: &Track) -> f64 {
        let hits = track.hit_count as f64;
        let hit_term = hits / (hits + QUALITY_HIT_HALF_LIFE);
        let miss_term = 1.0 / (1.0 + track.consecutive_misses as f64);
        let innov_term = 1.0 / (1.0 + track.mean_innovation() / QUALITY_INNOV_SCALE);
        let trace: f64 = (0..9).map(|i| track.cov[(i, i)]).sum();
        let cov_term = 1.0 / (1.0 + trace / QUALITY_TRACE_SCALE);
        let shape = 0.6 + 0.2 * innov_term + 0.2 * cov_term;
        let penalty = if track.degraded {
            QUALITY_DEGRADED_PENALTY
        } else {
            1.0
        };
        (hit_term * miss_term * shape * penalty).clamp(0.0, 1.0)
    }

    // -----------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------

    /// Remove terminated tracks older than the retention window. Returns
    /// the number removed.
    pub fn cleanup(&self, table: &mut TrackTable, now_ns: i64) -> usize {
        let retention_ns = (self.config.retention_sec * 1e9) as i64;
        let before = table.tracks.len();
        table.tracks.retain(|_, t| {
            t.is_active() || now_ns - t.last_update_ns <= retention_ns
        });
        before - table.tracks.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    fn manager(config: ManagementConfig, max_tracks: usize) -> TrackManager {
        TrackManager::new(
            config,
            VolumeConfig::default(),
            max_tracks,
            Arc::new(PipelineStats::new()),
        )
    }

    fn cluster_at(x: f64, y: f64, z: f64) -> Cluster {
        Cluster {
            cluster_id: 0,
            detections: vec![],
            centroid: Vec3::new(x, y, z),
            mean_velocity: Vec3::zeros(),
            confidence: 0.8,
            density: 1.0,
        }
    }

    fn birth_at(mgr: &TrackManager, table: &mut TrackTable, x: f64, now: i64) -> Option<TrackId> {
        let cluster = cluster_at(x, 0.0, 1000.0);
        let mut state = StateVec::zeros();
        state[0] = x;
        mgr.birth(table, &cluster, state, StateCov::identity(), now)
    }

    #[test]
    fn tentative_confirms_after_threshold_hits() {
        let mgr = manager(
            ManagementConfig {
                confirmation_threshold: 3,
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let track = table.get_mut(id).unwrap();
        assert_eq!(track.hit_count, 1);

        mgr.register_hit(track, 1); // hits = 2
        assert_eq!(track.lifecycle, TrackState::Tentative);
        mgr.register_hit(track, 2); // hits = 3 -> confirmed
        assert_eq!(track.lifecycle, TrackState::Confirmed);
    }

    #[test]
    fn tentative_terminates_at_tighter_miss_limit() {
        let mgr = manager(
            ManagementConfig {
                deletion_threshold: 5,
                tentative_deletion_threshold: Some(2),
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let track = table.get_mut(id).unwrap();
        mgr.register_miss(track, 1);
        assert_eq!(track.lifecycle, TrackState::Tentative);
        mgr.register_miss(track, 2);
        assert_eq!(track.lifecycle, TrackState::Terminated);
    }

    #[test]
    fn confirmed_coasts_then_recovers() {
        let mgr = manager(
            ManagementConfig {
                confirmation_threshold: 1,
                deletion_threshold: 3,
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let track = table.get_mut(id).unwrap();
        mgr.register_hit(track, 1);
        assert_eq!(track.lifecycle, TrackState::Confirmed);

        for i in 0..3 {
            mgr.register_miss(track, 2 + i);
        }
        assert_eq!(track.lifecycle, TrackState::Coasting);
        assert!(track.coasting_since_ns.is_some());
        assert_eq!(track.consecutive_misses, 3);

        // Re-acquisition returns to confirmed and resets misses
        mgr.register_hit(track, 10);
        assert_eq!(track.lifecycle, TrackState::Confirmed);
        assert_eq!(track.consecutive_misses, 0);
        assert!(track.coasting_since_ns.is_none());
    }

    #[test]
    fn coasting_terminates_after_timeout() {
        let mgr = manager(
            ManagementConfig {
                confirmation_threshold: 1,
                deletion_threshold: 1,
                max_coast_time_sec: 1.0,
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let track = table.get_mut(id).unwrap();
        mgr.register_hit(track, 0);
        mgr.register_miss(track, 0);
        assert_eq!(track.lifecycle, TrackState::Coasting);

        // within the window
        mgr.end_of_frame(&mut table, 500_000_000);
        assert_eq!(table.get(id).unwrap().lifecycle, TrackState::Coasting);
        // past the window
        mgr.end_of_frame(&mut table, 1_500_000_000);
        assert_eq!(table.get(id).unwrap().lifecycle, TrackState::Terminated);
    }

    #[test]
    fn quality_floor_terminates_tentative() {
        let mgr = manager(
            ManagementConfig {
                quality_threshold: 0.9, // unreachably high for a newborn
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        mgr.end_of_frame(&mut table, 1);
        assert_eq!(table.get(id).unwrap().lifecycle, TrackState::Terminated);
    }

    #[test]
    fn terminated_is_terminal() {
        let mgr = manager(
            ManagementConfig {
                tentative_deletion_threshold: Some(1),
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let track = table.get_mut(id).unwrap();
        mgr.register_miss(track, 1);
        assert_eq!(track.lifecycle, TrackState::Terminated);
        // further events must not resurrect it
        mgr.register_miss(track, 2);
        assert_eq!(track.lifecycle, TrackState::Terminated);
        mgr.end_of_frame(&mut table, 10);
        assert_eq!(table.get(id).unwrap().lifecycle, TrackState::Terminated);
    }

    #[test]
    fn track_ids_are_unique_and_monotone() {
        let mgr = manager(ManagementConfig::default(), 1000);
        let mut table = mgr.begin_frame();
        let mut last = 0u32;
        for i in 0..50 {
            let id = birth_at(&mgr, &mut table, i as f64 * 100.0, i).unwrap();
            assert!(id.0 > last, "ids must be strictly increasing");
            last = id.0;
        }
    }

    #[test]
    fn capacity_evicts_lowest_quality_tentative_first() {
        let mgr = manager(
            ManagementConfig {
                confirmation_threshold: 2,
                ..Default::default()
            },
            2,
        );
        let mut table = mgr.begin_frame();
        let a = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let b = birth_at(&mgr, &mut table, 1000.0, 0).unwrap();
        // make `a` clearly better: confirm it
        mgr.register_hit(table.get_mut(a).unwrap(), 1);
        let qa = mgr.score_quality(table.get(a).unwrap());
        table.get_mut(a).unwrap().quality_score = qa;
        let qb = mgr.score_quality(table.get(b).unwrap());
        table.get_mut(b).unwrap().quality_score = qb;
        assert!(qa > qb);

        let c = birth_at(&mgr, &mut table, 2000.0, 2).unwrap();
        assert_eq!(table.get(b).unwrap().lifecycle, TrackState::Terminated);
        assert_eq!(table.get(a).unwrap().lifecycle, TrackState::Confirmed);
        assert!(table.get(c).is_some());
        assert!(table.active_count() <= 2);
    }

    #[test]
    fn capacity_drops_birth_when_no_tentative_to_evict() {
        let mgr = manager(
            ManagementConfig {
                confirmation_threshold: 1,
                ..Default::default()
            },
            2,
        );
        let mut table = mgr.begin_frame();
        for x in [0.0, 1000.0] {
            let id = birth_at(&mgr, &mut table, x, 0).unwrap();
            mgr.register_hit(table.get_mut(id).unwrap(), 1); // all confirmed
        }
        assert!(birth_at(&mgr, &mut table, 2000.0, 2).is_none());
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn birth_outside_volume_rejected() {
        let mgr = TrackManager::new(
            ManagementConfig::default(),
            VolumeConfig {
                max_range_m: 1000.0,
                min_altitude_m: 0.0,
                max_altitude_m: 100.0,
            },
            10,
            Arc::new(PipelineStats::new()),
        );
        let mut table = mgr.begin_frame();
        let cluster = cluster_at(5000.0, 0.0, 50.0); // out of range
        assert!(mgr
            .birth(&mut table, &cluster, StateVec::zeros(), StateCov::identity(), 0)
            .is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn cleanup_respects_retention_window() {
        let mgr = manager(
            ManagementConfig {
                tentative_deletion_threshold: Some(1),
                retention_sec: 1.0,
                ..Default::default()
            },
            100,
        );
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        mgr.register_miss(table.get_mut(id).unwrap(), 0);
        assert_eq!(table.get(id).unwrap().lifecycle, TrackState::Terminated);

        // still inside the retention window
        assert_eq!(mgr.cleanup(&mut table, 500_000_000), 0);
        assert!(table.get(id).is_some());
        // past it
        assert_eq!(mgr.cleanup(&mut table, 2_000_000_000), 1);
        assert!(table.get(id).is_none());
    }

    #[test]
    fn quality_monotone_in_hits_and_misses() {
        let mgr = manager(ManagementConfig::default(), 10);
        let mut table = mgr.begin_frame();
        let id = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
        let track = table.get_mut(id).unwrap();

        let mut prev = mgr.score_quality(track);
        for i in 0..10 {
            mgr.register_hit(track, i);
            let q = mgr.score_quality(track);
            assert!(q >= prev, "quality must not fall with hits");
            prev = q;
        }
        track.consecutive_misses = 0;
        let q0 = mgr.score_quality(track);
        track.consecutive_misses = 4;
        assert!(mgr.score_quality(track) < q0);
    }

    #[test]
    fn snapshot_excludes_terminated() {
        let mgr = manager(
            ManagementConfig {
                tentative_deletion_threshold: Some(1),
                ..Default::default()
            },
            100,
        );
        {
            let mut table = mgr.begin_frame();
            let a = birth_at(&mgr, &mut table, 0.0, 0).unwrap();
            let _b = birth_at(&mgr, &mut table, 1000.0, 0).unwrap();
            mgr.register_miss(table.get_mut(a).unwrap(), 1);
        }
        let snap = mgr.active_tracks();
        assert_eq!(snap.len(), 1);
        assert!(snap.iter().all(|t| t.is_active()));
    }
}
