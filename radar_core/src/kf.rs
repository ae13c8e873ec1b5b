//! Kalman filter: predict and update on a constant-acceleration model.
//!
//! # Design choices
//! - Linear KF over a 9-dimensional state in `f64` via `nalgebra`.
//! - Position-only measurement by default; velocity rows are appended for
//!   high-SNR measurements.
//! - Joseph-form covariance update, then symmetrization and an eigenvalue
//!   lift so the posterior stays positive semi-definite.
//!
//! ## State vector
//! x = [px, py, pz, vx, vy, vz, ax, ay, az]^T  (9-dimensional)
//!
//! ## CA transition model
//! p += v*dt + a*dt^2/2,  v += a*dt
//!
//! ## Process noise Q (continuous white-noise jerk, discretized)
//! Per-axis 3x3 block in q * [[dt^5/20, dt^4/8, dt^3/6],
//!                           [dt^4/8,  dt^3/3, dt^2/2],
//!                           [dt^3/6,  dt^2/2, dt    ]]

use crate::config::TrackingConfig;
use crate::math::project_psd;
use crate::types::{Cluster, DMat, DVec, StateCov, StateVec};

/// Result of a KF update step. Innovation quantities are exposed for
/// association scoring and quality computation.
#[derive(Clone, Debug)]
pub struct KfUpdate {
    pub state: StateVec,
    pub cov: StateCov,
    /// Innovation v = z - H*x
    pub innovation: DVec,
    /// Innovation covariance S = H*P*H^T + R
    pub innovation_cov: DMat,
}

/// Constant-acceleration Kalman filter (9-state, linear).
#[derive(Clone, Debug)]
pub struct CaKalmanFilter {
    config: TrackingConfig,
}

impl CaKalmanFilter {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Build the state transition matrix F for timestep dt.
    pub fn transition_matrix(dt: f64) -> StateCov {
        let mut f = StateCov::identity();
        let half_dt2 = 0.5 * dt * dt;
        for i in 0..3usize {
            f[(i, i + 3)] = dt; // position += velocity * dt
            f[(i, i + 6)] = half_dt2; // position += accel * dt^2/2
            f[(i + 3, i + 6)] = dt; // velocity += accel * dt
        }
        f
    }

    /// Build the process noise matrix Q for timestep dt. Magnitude scales
    /// with `process_noise * dt`.
    fn process_noise(dt: f64, q: f64) -> StateCov {
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;
        let dt5 = dt4 * dt;
        let mut qm = StateCov::zeros();
        for i in 0..3usize {
            qm[(i, i)] = q * dt5 / 20.0;
            qm[(i + 3, i + 3)] = q * dt3 / 3.0;
            qm[(i + 6, i + 6)] = q * dt;
            qm[(i, i + 3)] = q * dt4 / 8.0;
            qm[(i + 3, i)] = q * dt4 / 8.0;
            qm[(i, i + 6)] = q * dt3 / 6.0;
            qm[(i + 6, i)] = q * dt3 / 6.0;
            qm[(i + 3, i + 6)] = q * dt2 / 2.0;
            qm[(i + 6, i + 3)] = q * dt2 / 2.0;
        }
        qm
    }

    /// Predict state and covariance forward by `dt` seconds. The caller is
    /// responsible for clamping `dt` to `max_dt` (and flagging the track
    /// degraded when it does).
    pub fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> (StateVec, StateCov) {
        let f = Self::transition_matrix(dt);
        let q = Self::process_noise(dt, self.config.process_noise);
        let predicted_state = f * state;
        let predicted_cov = project_psd(&(f * cov * f.transpose() + q));
        (predicted_state, predicted_cov)
    }

    /// Kalman update against observation `z` with matrix `H` and noise `R`.
    /// Returns `None` when the innovation covariance is singular; the
    /// caller skips the update and records a degenerate-gate event.
    pub fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Option<KfUpdate> {
        let x_dyn = DVec::from_iterator(9, state.iter().copied());
        let p_dyn = DMat::from_row_slice(9, 9, cov.transpose().as_slice());

        // Innovation: v = z - H*x
        let innovation = z - h * &x_dyn;

        // Innovation covariance: S = H*P*H^T + R
        let hp = h * &p_dyn;
        let s = &hp * h.transpose() + r;

        // Gain: K = P*H^T*S^-1 (LU; None on singular S)
        let s_inv = s.clone().lu().try_inverse()?;
        let k = &p_dyn * h.transpose() * &s_inv;

        // Posterior state: x' = x + K*v
        let dx = &k * &innovation;
        let new_state = StateVec::from_fn(|i, _| state[i] + dx[i]);

        // Joseph form: P' = (I-KH)*P*(I-KH)^T + K*R*K^T
        let i_kh = DMat::identity(9, 9) - &k * h;
        let p_post = &i_kh * &p_dyn * i_kh.transpose() + &k * r * k.transpose();
        let new_cov = project_psd(&StateCov::from_fn(|i, j| p_post[(i, j)]));

        Some(KfUpdate {
            state: new_state,
            cov: new_cov,
            innovation,
            innovation_cov: s,
        })
    }

    /// Initialize a state estimate from one cluster: position from the
    /// centroid, velocity from the cluster's velocity estimate,
    /// acceleration zero.
    pub fn init_from_cluster(&self, cluster: &Cluster) -> (StateVec, StateCov) {
        let mut state = StateVec::zeros();
        for i in 0..3 {
            state[i] = cluster.centroid[i];
            state[i + 3] = cluster.mean_velocity[i];
        }
        let u = &self.config.initial_uncertainty;
        let mut cov = StateCov::zeros();
        for i in 0..3 {
            cov[(i, i)] = u.position * u.position;
            cov[(i + 3, i + 3)] = u.velocity * u.velocity;
            cov[(i + 6, i + 6)] = u.acceleration * u.acceleration;
        }
        (state, cov)
    }

    /// 3x9 observation matrix for a position-only measurement.
    pub fn h_position() -> DMat {
        let mut h = DMat::zeros(3, 9);
        for i in 0..3 {
            h[(i, i)] = 1.0;
        }
        h
    }

    /// 6x9 observation matrix for a position + velocity measurement.
    pub fn h_position_velocity() -> DMat {
        let mut h = DMat::zeros(6, 9);
        for i in 0..6 {
            h[(i, i)] = 1.0;
        }
        h
    }

    /// Measurement noise for a position-only observation, inflated as SNR
    /// drops below `snr_ref_db`.
    pub fn r_position(&self, snr_db: f64, snr_ref_db: f64) -> DMat {
        let var = self.config.measurement_noise.powi(2) * snr_inflation(snr_db, snr_ref_db);
        DMat::from_diagonal(&DVec::from_element(3, var))
    }

    /// Measurement noise for a position + velocity observation.
    pub fn r_position_velocity(&self, snr_db: f64, snr_ref_db: f64) -> DMat {
        let infl = snr_inflation(snr_db, snr_ref_db);
        let pos_var = self.config.measurement_noise.powi(2) * infl;
        let vel_var = self.config.velocity_measurement_noise.powi(2) * infl;
        let mut diag = DVec::from_element(6, pos_var);
        for i in 3..6 {
            diag[i] = vel_var;
        }
        DMat::from_diagonal(&diag)
    }

    /// True when this measurement should include velocity rows.
    pub fn use_velocity_measurement(&self, snr_db: f64) -> bool {
        snr_db >= self.config.velocity_snr_db
    }
}

/// Noise inflation factor >= 1, growing as SNR drops below the reference.
fn snr_inflation(snr_db: f64, snr_ref_db: f64) -> f64 {
    if snr_db >= snr_ref_db {
        1.0
    } else {
        1.0 + (snr_ref_db - snr_db.max(0.0)) / snr_ref_db.max(f64::EPSILON)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
