//! Fundamental types shared across the whole workspace.

use nalgebra::{DMatrix, DVector, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar and algebra types: f64 throughout for filter stability.
// ---------------------------------------------------------------------------

/// 3D point/vector in the sensor Cartesian frame (meters or m/s).
pub type Vec3 = Vector3<f64>;

/// 9-DOF state vector: [px, py, pz, vx, vy, vz, ax, ay, az]
pub type StateVec = SVector<f64, 9>;

/// 9×9 state covariance matrix
pub type StateCov = SMatrix<f64, 9, 9>;

/// Generic dynamic-size vector (measurement innovation)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (H, R, S)
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Identifier types — newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

/// Globally unique track identifier. Monotonically allocated, never reused
/// within a run.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u32);

/// Globally unique detection identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectionId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// One instantaneous radar return, as emitted by the decoder.
///
/// Immutable once constructed. Position is in the sensor Cartesian frame;
/// `range`/`azimuth`/`elevation` are the raw spherical measurement the
/// position was derived from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    /// Position in the sensor frame (meters)
    pub position: Vec3,
    /// Radial velocity estimate resolved to Cartesian (m/s)
    pub velocity: Vec3,
    /// Slant range (meters), >= 0
    pub range: f64,
    /// Azimuth in [-pi, pi]
    pub azimuth: f64,
    /// Elevation in [-pi/2, pi/2]
    pub elevation: f64,
    /// Signal-to-noise ratio (dB)
    pub snr: f64,
    /// Radar cross section (m^2)
    pub rcs: f64,
    pub beam_id: u32,
    /// Monotonic timestamp (nanoseconds); equals the frame's arrival time
    pub timestamp_ns: i64,
}

// ---------------------------------------------------------------------------
// Cluster: ephemeral, lives within one pipeline tick
// ---------------------------------------------------------------------------

/// A density-grouped set of detections within one frame, treated as one
/// measurement by the tracking stage. Never persisted across frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    /// Frame-local id (index order of discovery)
    pub cluster_id: u32,
    pub detections: Vec<Detection>,
    /// Arithmetic mean of member positions
    pub centroid: Vec3,
    /// Mean member velocity estimate
    pub mean_velocity: Vec3,
    /// In [0, 1]; derived from mean SNR and member count
    pub confidence: f64,
    /// Members per unit epsilon-volume proxy
    pub density: f64,
}

impl Cluster {
    /// Mean SNR over the member detections (dB).
    pub fn mean_snr(&self) -> f64 {
        if self.detections.is_empty() {
            return 0.0;
        }
        self.detections.iter().map(|d| d.snr).sum::<f64>() / self.detections.len() as f64
    }

    /// Mean slant range of the members (meters).
    pub fn mean_range(&self) -> f64 {
        if self.detections.is_empty() {
            return 0.0;
        }
        self.detections.iter().map(|d| d.range).sum::<f64>() / self.detections.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Track lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of a track. Discriminants are wire-stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrackState {
    /// New track, not yet confirmed — may be spurious
    Tentative = 0,
    /// Confirmed by repeated associations
    Confirmed = 1,
    /// Maintained by prediction alone while awaiting re-acquisition
    Coasting = 2,
    /// Terminal; never re-associated, removed by cleanup
    Terminated = 3,
}

// ---------------------------------------------------------------------------
// Tracking mode
// ---------------------------------------------------------------------------

/// Scan mode of the radar. Selects the ingress overflow policy among
/// other things.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    /// Track-while-scan: continuous sweep, frame-drop on overload
    #[serde(rename = "TWS")]
    Tws,
    /// Dedicated beam dwells: lossless, producer blocks on overload
    #[serde(rename = "BEAM_REQUEST")]
    BeamRequest,
}

// ---------------------------------------------------------------------------
// Stage payloads: the frame is the atomic unit through the pipeline
// ---------------------------------------------------------------------------

/// One opaque sensor frame as delivered by the communication adapter.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Arrival timestamp (monotonic nanoseconds)
    pub arrival_ns: i64,
    pub bytes: Vec<u8>,
}

/// Decoder output for one frame.
#[derive(Clone, Debug)]
pub struct FrameDetections {
    /// Frame sequence number from the wire header
    pub seq: u64,
    pub arrival_ns: i64,
    pub detections: Vec<Detection>,
}

/// Clustering output for one frame. Detections ride along for optional
/// egress publication.
#[derive(Clone, Debug)]
pub struct FrameClusters {
    pub seq: u64,
    pub arrival_ns: i64,
    pub clusters: Vec<Cluster>,
    pub detections: Vec<Detection>,
}

// ---------------------------------------------------------------------------
// Egress records (wire-stable)
// ---------------------------------------------------------------------------

/// Per-track egress record. Field set and enum discriminants are
/// wire-stable; adapters serialize this shape verbatim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: u32,
    pub state: TrackState,
    pub position: (f64, f64, f64),
    pub velocity: (f64, f64, f64),
    pub acceleration: (f64, f64, f64),
    /// Diagonal of the 9×9 state covariance
    pub covariance_diag: [f64; 9],
    pub confidence: f64,
    pub quality_score: f64,
    pub last_update_ns: i64,
    pub hit_count: u32,
    pub consecutive_misses: u32,
}

/// Dedicated-beam dwell request emitted for confirmed tracks in
/// BEAM_REQUEST mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeamRequest {
    pub beam_id: u32,
    pub azimuth: f64,
    pub elevation: f64,
    pub dwell_time_ms: f64,
    pub track_id: u32,
    pub request_ns: i64,
}

/// What the tracking stage publishes downstream for one frame: a
/// whole-frame atomic snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackFrame {
    pub seq: u64,
    pub arrival_ns: i64,
    pub tracks: Vec<TrackRecord>,
    /// Present when `publish_detections` is configured
    pub detections: Option<Vec<Detection>>,
    /// Present when `publish_clusters` is configured
    pub clusters: Option<Vec<Cluster>>,
    pub beam_requests: Vec<BeamRequest>,
    pub stats: crate::stats::StatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_state_wire_discriminants() {
        assert_eq!(TrackState::Tentative as u8, 0);
        assert_eq!(TrackState::Confirmed as u8, 1);
        assert_eq!(TrackState::Coasting as u8, 2);
        assert_eq!(TrackState::Terminated as u8, 3);
    }

    #[test]
    fn cluster_mean_snr_empty_is_zero() {
        let c = Cluster {
            cluster_id: 0,
            detections: vec![],
            centroid: Vec3::zeros(),
            mean_velocity: Vec3::zeros(),
            confidence: 0.0,
            density: 0.0,
        };
        assert_eq!(c.mean_snr(), 0.0);
    }

    #[test]
    fn tracking_mode_serde_names() {
        let tws: TrackingMode = serde_yaml::from_str("TWS").unwrap();
        assert_eq!(tws, TrackingMode::Tws);
        let br: TrackingMode = serde_yaml::from_str("BEAM_REQUEST").unwrap();
        assert_eq!(br, TrackingMode::BeamRequest);
    }
}
