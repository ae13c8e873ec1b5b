//! Mahalanobis gating: decides whether a cluster is close enough to a
//! predicted track to be an association candidate.
//!
//! # Gating criterion
//! d²(z, track) = vᵀ S⁻¹ v  where v = z − H·x̂_pred,  S = H·P_pred·Hᵀ + R
//!
//! Accept if d² ≤ χ²(validation_gate, dof). dof = 3 for the position-only
//! measurement, 6 when velocity rows are present.

use crate::math::chi_squared_quantile;
use crate::types::{DMat, DVec, StateCov, StateVec};

/// Gate thresholds derived once at init from the configured χ²
/// probability.
#[derive(Clone, Copy, Debug)]
pub struct GateThresholds {
    /// χ²(p, 3) for position-only measurements
    pub position: f64,
    /// χ²(p, 6) for position+velocity measurements
    pub position_velocity: f64,
}

impl GateThresholds {
    pub fn from_probability(p: f64) -> Self {
        Self {
            position: chi_squared_quantile(p, 3),
            position_velocity: chi_squared_quantile(p, 6),
        }
    }

    pub fn for_dim(&self, dim: usize) -> f64 {
        match dim {
            3 => self.position,
            6 => self.position_velocity,
            d => chi_squared_quantile(0.99, d),
        }
    }
}

/// Result of a gate check for one (track, cluster) pair.
#[derive(Clone, Debug)]
pub struct GateResult {
    /// Mahalanobis distance squared
    pub d2: f64,
    /// True if d² ≤ gate threshold
    pub passes: bool,
    /// Innovation vector (reused by the KF update)
    pub innovation: DVec,
    /// Innovation covariance S
    pub innovation_cov: DMat,
}

/// Check whether observation `z` passes the Mahalanobis gate for a
/// predicted state `(state, cov)` under observation matrix `H` and
/// measurement noise `R`. A singular `S` rejects the pair (d² = ∞).
pub fn mahalanobis_gate(
    state: &StateVec,
    cov: &StateCov,
    z: &DVec,
    h: &DMat,
    r: &DMat,
    gate_threshold: f64,
) -> GateResult {
    let x_dyn = DVec::from_iterator(9, state.iter().copied());
    let innovation = z - h * &x_dyn;

    let p_dyn = DMat::from_row_slice(9, 9, cov.transpose().as_slice());
    let s = h * &p_dyn * h.transpose() + r;

    let d2 = match s.clone().lu().try_inverse() {
        Some(s_inv) => {
            let v = &s_inv * &innovation;
            innovation.dot(&v)
        }
        None => f64::INFINITY, // degenerate — reject
    };

    GateResult {
        d2,
        passes: d2 <= gate_threshold,
        innovation,
        innovation_cov: s,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
