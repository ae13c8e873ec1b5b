//! Track: state estimate, covariance, lifecycle attributes, bounded
//! histories.

use crate::types::{
    Detection, StateCov, StateVec, TrackId, TrackRecord, TrackState, Vec3,
};
use std::collections::VecDeque;

/// A persistent hypothesis about one target. Owned exclusively by the
/// track manager's table; everything else sees clones.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    /// Estimated state [px,py,pz,vx,vy,vz,ax,ay,az]
    pub state: StateVec,
    /// 9×9 state covariance; symmetric positive semi-definite
    pub cov: StateCov,
    pub lifecycle: TrackState,
    /// In [0, 1]; blends association probability and cluster confidence
    pub confidence: f64,
    /// In [0, 1]; see `TrackManager::score_quality`
    pub quality_score: f64,
    pub created_ns: i64,
    /// Time of the last measurement update; monotone non-decreasing
    pub last_update_ns: i64,
    /// Time the state has been predicted to; advances every frame
    pub predicted_ns: i64,
    /// When the track entered COASTING (coast-timeout bookkeeping)
    pub coasting_since_ns: Option<i64>,
    /// Recently associated detections, most recent last, bounded
    pub history: VecDeque<Detection>,
    /// Recent position samples, most recent last, bounded
    pub trajectory: VecDeque<Vec3>,
    /// Recent innovation magnitudes, bounded (quality input)
    pub innovation_history: VecDeque<f64>,
    pub consecutive_misses: u32,
    pub hit_count: u32,
    /// Set by clamped-dt predictions and degenerate updates; lowers quality
    pub degraded: bool,
}

impl Track {
    /// Create a new tentative track. Birth counts as the first hit.
    pub fn new(id: TrackId, state: StateVec, cov: StateCov, birth_ns: i64) -> Self {
        let mut trajectory = VecDeque::new();
        trajectory.push_back(Vec3::new(state[0], state[1], state[2]));
        Self {
            id,
            state,
            cov,
            lifecycle: TrackState::Tentative,
            confidence: 0.0,
            quality_score: 0.5,
            created_ns: birth_ns,
            last_update_ns: birth_ns,
            predicted_ns: birth_ns,
            coasting_since_ns: None,
            history: VecDeque::new(),
            trajectory,
            innovation_history: VecDeque::new(),
            consecutive_misses: 0,
            hit_count: 1,
            degraded: false,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.state[0], self.state[1], self.state[2])
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.state[3], self.state[4], self.state[5])
    }

    pub fn acceleration(&self) -> Vec3 {
        Vec3::new(self.state[6], self.state[7], self.state[8])
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle != TrackState::Terminated
    }

    /// Record an associated detection, bounded to `history_len`.
    pub fn push_detection(&mut self, det: Detection, history_len: usize) {
        if self.history.len() >= history_len {
            self.history.pop_front();
        }
        self.history.push_back(det);
    }

    /// Record a trajectory sample, bounded to `trajectory_len`.
    pub fn push_trajectory(&mut self, trajectory_len: usize) {
        if self.trajectory.len() >= trajectory_len {
            self.trajectory.pop_front();
        }
        self.trajectory.push_back(self.position());
    }

    /// Record an innovation magnitude, bounded to `history_len`.
    pub fn push_innovation(&mut self, magnitude: f64, history_len: usize) {
        if self.innovation_history.len() >= history_len {
            self.innovation_history.pop_front();
        }
        self.innovation_history.push_back(magnitude);
    }

    /// Mean innovation magnitude over the bounded history.
    pub fn mean_innovation(&self) -> f64 {
        if self.innovation_history.is_empty() {
            return 0.0;
        }
        self.innovation_history.iter().sum::<f64>() / self.innovation_history.len() as f64
    }

    /// Wire-stable egress record for this track.
    pub fn to_record(&self) -> TrackRecord {
        let p = self.position();
        let v = self.velocity();
        let a = self.acceleration();
        let mut covariance_diag = [0.0; 9];
        for (i, slot) in covariance_diag.iter_mut().enumerate() {
            *slot = self.cov[(i, i)];
        }
        TrackRecord {
            track_id: self.id.0,
            state: self.lifecycle,
            position: (p.x, p.y, p.z),
            velocity: (v.x, v.y, v.z),
            acceleration: (a.x, a.y, a.z),
            covariance_diag,
            confidence: self.confidence,
            quality_score: self.quality_score,
            last_update_ns: self.last_update_ns,
            hit_count: self.hit_count,
            consecutive_misses: self.consecutive_misses,
        }
    }
}
