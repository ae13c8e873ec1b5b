//! YAML-backed configuration surface.
//!
//! Loaded once at startup, validated fail-fast, then shared read-only
//! (`Arc<Config>`) into every stage. There is no ambient singleton and no
//! runtime mutation; a reload produces a new value swapped at a frame
//! boundary by the caller.
//!
//! ## Example
//!
//! ```yaml
//! system:
//!   tracking_mode: TWS
//!   max_tracks: 200
//!   update_rate_hz: 10.0
//! algorithms:
//!   clustering:
//!     epsilon: 100.0
//!     min_points: 3
//!   association:
//!     validation_gate: 0.99
//!   tracking:
//!     process_noise: 5.0
//!     measurement_noise: 25.0
//!   management:
//!     confirmation_threshold: 3
//!     deletion_threshold: 5
//! ```

use crate::error::RadarError;
use crate::types::TrackingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub algorithms: AlgorithmsConfig,
    pub pipeline: PipelineConfig,
    pub volume: VolumeConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub tracking_mode: TrackingMode,
    /// Hard cap on active (non-terminated) tracks
    pub max_tracks: usize,
    /// Nominal frame rate
    pub update_rate_hz: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            tracking_mode: TrackingMode::Tws,
            max_tracks: 200,
            update_rate_hz: 10.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmsConfig {
    pub clustering: ClusteringConfig,
    pub association: AssociationConfig,
    pub tracking: TrackingConfig,
    pub management: ManagementConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Base neighborhood radius (meters of composite distance)
    pub epsilon: f64,
    /// Minimum points for a dense region
    pub min_points: usize,
    pub range_weight: f64,
    pub azimuth_weight: f64,
    pub velocity_weight: f64,
    /// eps(r) = epsilon + adaptive_epsilon_factor * r
    pub use_adaptive_epsilon: bool,
    pub adaptive_epsilon_factor: f64,
    /// Safety valve against sensor malfunction
    pub max_clusters: usize,
    /// Detections below this SNR (dB) are dropped before clustering
    pub snr_threshold: f64,
    pub enable_preprocessing: bool,
    /// SNR (dB) at which the SNR term of cluster confidence saturates
    pub snr_ref: f64,
    /// Member count at which the count term of cluster confidence saturates
    pub saturation_count: usize,
    /// Clusters below this confidence are dropped
    pub min_confidence: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            epsilon: 100.0,
            min_points: 3,
            range_weight: 0.3,
            azimuth_weight: 0.2,
            velocity_weight: 0.5,
            use_adaptive_epsilon: false,
            adaptive_epsilon_factor: 0.01,
            max_clusters: 100,
            snr_threshold: 10.0,
            enable_preprocessing: true,
            snr_ref: 20.0,
            saturation_count: 8,
            min_confidence: 0.05,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Chi-squared gate probability (3 dof for position-only measurement)
    pub validation_gate: f64,
    /// Deprecated alias of `validation_gate`; ignored when both are set
    pub gating_threshold: Option<f64>,
    /// Clutter term added to the association-probability normalizer
    pub clutter_density: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            validation_gate: 0.99,
            gating_threshold: None,
            clutter_density: 1e-4,
        }
    }
}

/// Initial state uncertainty (1-sigma) for newborn tracks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialUncertainty {
    /// Position (meters)
    pub position: f64,
    /// Velocity (m/s)
    pub velocity: f64,
    /// Acceleration (m/s^2)
    pub acceleration: f64,
}

impl Default for InitialUncertainty {
    fn default() -> Self {
        Self {
            position: 100.0,
            velocity: 50.0,
            acceleration: 10.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Process noise spectral density (jerk variance). Higher = more
    /// maneuvering allowed.
    pub process_noise: f64,
    /// Position measurement noise 1-sigma (meters)
    pub measurement_noise: f64,
    pub initial_uncertainty: InitialUncertainty,
    /// Hard cap on the prediction step; larger dt clamps and degrades
    pub max_dt: f64,
    /// Velocity rows are added to the measurement when mean SNR (dB) is at
    /// least this
    pub velocity_snr_db: f64,
    /// Velocity measurement noise 1-sigma (m/s)
    pub velocity_measurement_noise: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            process_noise: 2.0,
            measurement_noise: 50.0,
            initial_uncertainty: InitialUncertainty::default(),
            max_dt: 1.0,
            velocity_snr_db: 25.0,
            velocity_measurement_noise: 10.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Hits required to confirm a tentative track
    pub confirmation_threshold: u32,
    /// Consecutive misses before a confirmed track starts coasting
    pub deletion_threshold: u32,
    /// Consecutive misses before a tentative track terminates. Derived as
    /// `max(1, deletion_threshold / 2)` when not set.
    pub tentative_deletion_threshold: Option<u32>,
    /// Coasting tracks terminate after this long without re-acquisition
    pub max_coast_time_sec: f64,
    /// Quality floor below which tentative/coasting tracks terminate
    pub quality_threshold: f64,
    /// Terminated tracks are removed after this retention window
    pub retention_sec: f64,
    /// Bound on the per-track associated-detection history
    pub history_len: usize,
    /// Bound on the per-track trajectory sample
    pub trajectory_len: usize,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 3,
            deletion_threshold: 5,
            tentative_deletion_threshold: None,
            max_coast_time_sec: 10.0,
            quality_threshold: 0.05,
            retention_sec: 5.0,
            history_len: 32,
            trajectory_len: 256,
        }
    }
}

impl ManagementConfig {
    /// Tentative tracks prune faster than confirmed ones.
    pub fn tentative_deletion(&self) -> u32 {
        self.tentative_deletion_threshold
            .unwrap_or_else(|| (self.deletion_threshold / 2).max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each inter-stage channel (frames)
    pub channel_capacity: usize,
    /// Bounded wait for stages to drain at shutdown
    pub drain_timeout_sec: f64,
    /// Health-monitor wake period
    pub health_period_sec: f64,
    /// Publish raw detections alongside tracks
    pub publish_detections: bool,
    /// Publish clusters alongside tracks
    pub publish_clusters: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            drain_timeout_sec: 30.0,
            health_period_sec: 5.0,
            publish_detections: false,
            publish_clusters: false,
        }
    }
}

/// Operational volume within which unassigned clusters may seed new tracks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub max_range_m: f64,
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            max_range_m: 150_000.0,
            min_altitude_m: -500.0,
            max_altitude_m: 30_000.0,
        }
    }
}

impl VolumeConfig {
    pub fn contains(&self, p: &crate::types::Vec3) -> bool {
        p.norm() <= self.max_range_m && p.z >= self.min_altitude_m && p.z <= self.max_altitude_m
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, RadarError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text).map_err(|e| {
            RadarError::config(path.display().to_string(), format!("YAML parse error: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation of every recognized option. Called at init;
    /// the system refuses to start on any violation.
    pub fn validate(&self) -> Result<(), RadarError> {
        let c = &self.algorithms.clustering;
        if self.system.max_tracks == 0 {
            return Err(RadarError::config("system.max_tracks", "must be > 0"));
        }
        if !(self.system.update_rate_hz > 0.0) {
            return Err(RadarError::config("system.update_rate_hz", "must be > 0"));
        }
        if !(c.epsilon > 0.0) {
            return Err(RadarError::config("algorithms.clustering.epsilon", "must be > 0"));
        }
        if c.min_points == 0 {
            return Err(RadarError::config(
                "algorithms.clustering.min_points",
                "must be >= 1",
            ));
        }
        if c.range_weight < 0.0 || c.azimuth_weight < 0.0 || c.velocity_weight < 0.0 {
            return Err(RadarError::config(
                "algorithms.clustering.*_weight",
                "weights must be non-negative",
            ));
        }
        if c.max_clusters == 0 {
            return Err(RadarError::config(
                "algorithms.clustering.max_clusters",
                "must be >= 1",
            ));
        }
        let a = &self.algorithms.association;
        if !(a.validation_gate > 0.0 && a.validation_gate < 1.0) {
            return Err(RadarError::config(
                "algorithms.association.validation_gate",
                "must lie in (0, 1)",
            ));
        }
        if a.gating_threshold.is_some() {
            tracing::warn!(
                "algorithms.association.gating_threshold is deprecated; \
                 using validation_gate"
            );
        }
        let t = &self.algorithms.tracking;
        if !(t.process_noise > 0.0) {
            return Err(RadarError::config(
                "algorithms.tracking.process_noise",
                "must be > 0",
            ));
        }
        if !(t.measurement_noise > 0.0) {
            return Err(RadarError::config(
                "algorithms.tracking.measurement_noise",
                "must be > 0",
            ));
        }
        if !(t.max_dt > 0.0) {
            return Err(RadarError::config("algorithms.tracking.max_dt", "must be > 0"));
        }
        if !(t.initial_uncertainty.position > 0.0
            && t.initial_uncertainty.velocity > 0.0
            && t.initial_uncertainty.acceleration > 0.0)
        {
            return Err(RadarError::config(
                "algorithms.tracking.initial_uncertainty",
                "all sigmas must be > 0",
            ));
        }
        let m = &self.algorithms.management;
        if m.confirmation_threshold == 0 {
            return Err(RadarError::config(
                "algorithms.management.confirmation_threshold",
                "must be >= 1",
            ));
        }
        if m.deletion_threshold == 0 {
            return Err(RadarError::config(
                "algorithms.management.deletion_threshold",
                "must be >= 1",
            ));
        }
        if !(m.max_coast_time_sec > 0.0) {
            return Err(RadarError::config(
                "algorithms.management.max_coast_time_sec",
                "must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&m.quality_threshold) {
            return Err(RadarError::config(
                "algorithms.management.quality_threshold",
                "must lie in [0, 1]",
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(RadarError::config("pipeline.channel_capacity", "must be >= 1"));
        }
        if !(self.pipeline.drain_timeout_sec > 0.0) {
            return Err(RadarError::config("pipeline.drain_timeout_sec", "must be > 0"));
        }
        if !(self.volume.max_range_m > 0.0) {
            return Err(RadarError::config("volume.max_range_m", "must be > 0"));
        }
        if self.volume.min_altitude_m >= self.volume.max_altitude_m {
            return Err(RadarError::config(
                "volume.min_altitude_m",
                "must be below max_altitude_m",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
