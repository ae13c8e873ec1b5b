//! Error kinds and propagation policy.
//!
//! Stage-local recoverable errors are logged and counted; they never cross
//! stage boundaries. Only [`RadarError::ConfigInvalid`] and
//! [`RadarError::StageFatal`] surface to the operator.

use crate::types::TrackId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadarError {
    /// Missing or out-of-range configuration. Fatal at init.
    #[error("invalid configuration `{field}`: {reason}")]
    ConfigInvalid { field: String, reason: String },

    /// Bad bytes in one frame. Recoverable: the valid prefix is kept.
    #[error("malformed frame at byte {offset}: {reason}")]
    DecodeMalformed { offset: usize, reason: String },

    /// Singular innovation covariance or non-PSD posterior. Recoverable:
    /// the update is skipped and the track marked degraded.
    #[error("degenerate innovation covariance for {0}")]
    Degenerate(TrackId),

    /// Downstream channel full past the timeout. Recoverable.
    #[error("backpressure at stage `{stage}`")]
    Backpressure { stage: &'static str },

    /// Active-track cap reached and no evictable tentative track.
    #[error("track capacity exceeded (max_tracks = {max_tracks})")]
    CapacityExceeded { max_tracks: usize },

    /// Unrecoverable internal invariant violation in a stage. Fatal.
    #[error("fatal error in stage `{stage}`: {reason}")]
    StageFatal { stage: &'static str, reason: String },

    /// Stages did not drain within the bounded shutdown wait.
    #[error("shutdown timed out with {pending} worker(s) still running")]
    ShutdownTimeout { pending: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadarError {
    /// Shorthand used by config validation.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
