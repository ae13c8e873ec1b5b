//! Radar measurement simulator.
//!
//! Generates per-frame returns with:
//! - multiple returns per target (range/azimuth cell spread)
//! - Gaussian-ish measurement noise on range and angles
//! - per-target miss probability (1 - P_D)
//! - Poisson clutter (false alarms) uniform over the coverage disc
//!
//! Deterministic given the seed.

use crate::encode::SimReturn;
use crate::target::Target;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Physical configuration of the simulated radar (at the origin).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadarParams {
    /// Maximum detection range (meters)
    pub max_range: f64,
    /// Probability of detection per target per scan
    pub p_detection: f64,
    /// Mean number of clutter returns per scan
    pub lambda_clutter: f64,
    /// Returns produced per detected target per scan
    pub returns_per_target: usize,
    /// Measurement noise: range std (meters)
    pub range_noise_std: f64,
    /// Measurement noise: azimuth std (radians)
    pub azimuth_noise_std: f64,
    /// Measurement noise: elevation std (radians)
    pub elevation_noise_std: f64,
    /// Mean target SNR (dB)
    pub snr_mean: f64,
    /// Clutter SNR (dB); keep near the preprocess floor
    pub clutter_snr: f64,
}

impl Default for RadarParams {
    fn default() -> Self {
        Self {
            max_range: 150_000.0,
            p_detection: 0.95,
            lambda_clutter: 0.0,
            returns_per_target: 4,
            range_noise_std: 30.0,
            azimuth_noise_std: 0.002,
            elevation_noise_std: 0.002,
            snr_mean: 20.0,
            clutter_snr: 12.0,
        }
    }
}

/// Generates radar returns from ground-truth targets.
pub struct RadarSimulator {
    pub params: RadarParams,
    rng: ChaCha8Rng,
}

impl RadarSimulator {
    pub fn new(params: RadarParams, seed: u64) -> Self {
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform noise in [-std, std]; matches the measurement model's
    /// bounded-error assumption and keeps runs strictly reproducible.
    fn noise(&mut self, std: f64) -> f64 {
        self.rng.gen::<f64>() * std * 2.0 - std
    }

    /// Generate one frame of returns at simulation time `t` (seconds).
    pub fn observe(&mut self, targets: &[Target], t: f64) -> Vec<SimReturn> {
        let mut returns = Vec::new();
        let p = self.params.clone();

        for target in targets {
            if !target.is_active(t) {
                continue;
            }
            if self.rng.gen::<f64>() > p.p_detection {
                continue;
            }
            let [x, y, z, vx, vy, vz] = target.state;
            let range = (x * x + y * y + z * z).sqrt();
            if range > p.max_range || range < 1.0 {
                continue;
            }
            let azimuth = y.atan2(x);
            let elevation = (z / range).clamp(-1.0, 1.0).asin();

            for _ in 0..p.returns_per_target {
                let snr = (p.snr_mean + self.noise(3.0)) as f32;
                returns.push(SimReturn {
                    range: (range + self.noise(p.range_noise_std)).max(1.0),
                    azimuth: wrap_pi(azimuth + self.noise(p.azimuth_noise_std)),
                    elevation: (elevation + self.noise(p.elevation_noise_std))
                        .clamp(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2),
                    velocity: [
                        vx + self.noise(2.0),
                        vy + self.noise(2.0),
                        vz + self.noise(2.0),
                    ],
                    snr,
                    rcs: 2.0 + self.noise(1.0) as f32,
                    beam_id: 0,
                });
            }
        }

        // Poisson clutter by inversion.
        let n_clutter = self.poisson(p.lambda_clutter);
        for _ in 0..n_clutter {
            let range = p.max_range * self.rng.gen::<f64>().sqrt();
            let azimuth = self.rng.gen::<f64>() * std::f64::consts::TAU - std::f64::consts::PI;
            let elevation = self.noise(0.2);
            returns.push(SimReturn {
                range: range.max(1.0),
                azimuth,
                elevation,
                velocity: [self.noise(50.0), self.noise(50.0), 0.0],
                snr: (p.clutter_snr + self.noise(2.0)) as f32,
                rcs: 0.1,
                beam_id: 0,
            });
        }

        returns
    }

    fn poisson(&mut self, lambda: f64) -> usize {
        if lambda <= 0.0 {
            return 0;
        }
        let threshold = (-lambda).exp();
        let mut n = 0usize;
        let mut prod = self.rng.gen::<f64>();
        while prod > threshold && n < 200 {
            prod *= self.rng.gen::<f64>();
            n += 1;
        }
        n
    }
}

fn wrap_pi(a: f64) -> f64 {
    let w = (a + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU);
    w - std::f64::consts::PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MotionSpec;

    #[test]
    fn returns_cluster_around_truth() {
        let params = RadarParams::default();
        let mut sim = RadarSimulator::new(params, 7);
        let targets = vec![Target::new(
            0,
            [10_000.0, 0.0, 1_000.0],
            [100.0, 0.0, 0.0],
            MotionSpec::ConstantVelocity,
        )];
        let returns = sim.observe(&targets, 0.0);
        assert_eq!(returns.len(), 4);
        let true_range = (10_000.0f64.powi(2) + 1_000.0f64.powi(2)).sqrt();
        for r in &returns {
            assert!((r.range - true_range).abs() < 100.0);
            assert!(r.azimuth.abs() < 0.01);
        }
    }

    #[test]
    fn deterministic_for_same_seed() {
        let targets = vec![Target::new(
            0,
            [5_000.0, 5_000.0, 500.0],
            [0.0, 0.0, 0.0],
            MotionSpec::ConstantVelocity,
        )];
        let a = RadarSimulator::new(RadarParams::default(), 42).observe(&targets, 0.0);
        let b = RadarSimulator::new(RadarParams::default(), 42).observe(&targets, 0.0);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.range, y.range);
            assert_eq!(x.azimuth, y.azimuth);
        }
    }

    #[test]
    fn clutter_only_when_lambda_positive() {
        let mut quiet = RadarSimulator::new(RadarParams::default(), 1);
        assert!(quiet.observe(&[], 0.0).is_empty());

        let mut noisy = RadarSimulator::new(
            RadarParams {
                lambda_clutter: 50.0,
                ..Default::default()
            },
            1,
        );
        // Poisson(50) over a few frames will certainly produce returns
        let total: usize = (0..5).map(|_| noisy.observe(&[], 0.0).len()).sum();
        assert!(total > 100);
    }
}
