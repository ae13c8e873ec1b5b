//! Math utilities: angles, coordinate transforms, chi-squared quantiles,
//! Gaussian densities, and covariance conditioning.
//!
//! # Conventions
//! - Azimuth = atan2(y, x) in [-pi, pi]
//! - Elevation = asin(z / r) in [-pi/2, pi/2]
//! - All angles in radians, all distances in meters.

use crate::types::{DMat, DVec, StateCov, Vec3};
use std::f64::consts::PI;

/// Eigenvalue floor applied when projecting a covariance back to PSD.
pub const PSD_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Angles
// ---------------------------------------------------------------------------

/// Wrap an angle into [-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let a = (angle + PI).rem_euclid(2.0 * PI);
    a - PI
}

/// Smallest signed difference between two angles, accounting for wraparound.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

// ---------------------------------------------------------------------------
// Coordinate transforms
// ---------------------------------------------------------------------------

/// Spherical (range, azimuth, elevation) to sensor-frame Cartesian.
pub fn spherical_to_cartesian(range: f64, azimuth: f64, elevation: f64) -> Vec3 {
    let ce = elevation.cos();
    Vec3::new(
        range * ce * azimuth.cos(),
        range * ce * azimuth.sin(),
        range * elevation.sin(),
    )
}

/// Cartesian to spherical (range, azimuth, elevation).
///
/// At the origin both angles are zero by convention.
pub fn cartesian_to_spherical(p: &Vec3) -> (f64, f64, f64) {
    let range = p.norm();
    if range < f64::EPSILON {
        return (0.0, 0.0, 0.0);
    }
    let azimuth = p.y.atan2(p.x);
    let elevation = (p.z / range).clamp(-1.0, 1.0).asin();
    (range, azimuth, elevation)
}

// ---------------------------------------------------------------------------
// Chi-squared
// ---------------------------------------------------------------------------

/// Regularized lower incomplete gamma P(a, x), by series expansion for
/// x < a + 1 and continued fraction otherwise (Numerical Recipes scheme).
fn gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let ln_gamma_a = ln_gamma(a);
    if x < a + 1.0 {
        // Series representation
        let mut term = 1.0 / a;
        let mut sum = term;
        let mut ap = a;
        for _ in 0..200 {
            ap += 1.0;
            term *= x / ap;
            sum += term;
            if term.abs() < sum.abs() * 1e-15 {
                break;
            }
        }
        sum * (-x + a * x.ln() - ln_gamma_a).exp()
    } else {
        // Continued fraction for Q(a, x), then P = 1 - Q
        let tiny = 1e-300;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..200 {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let del = d * c;
            h *= del;
            if (del - 1.0).abs() < 1e-15 {
                break;
            }
        }
        let q = (-x + a * x.ln() - ln_gamma_a).exp() * h;
        1.0 - q
    }
}

/// Lanczos approximation of ln(Gamma(x)) for x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COEF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

/// CDF of the chi-squared distribution with `dof` degrees of freedom.
pub fn chi_squared_cdf(x: f64, dof: usize) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    gamma_p(dof as f64 / 2.0, x / 2.0)
}

/// Inverse CDF (quantile) of chi-squared with `dof` degrees of freedom,
/// by bisection. `p` must lie in (0, 1).
pub fn chi_squared_quantile(p: f64, dof: usize) -> f64 {
    assert!(p > 0.0 && p < 1.0, "quantile probability out of (0,1)");
    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    while chi_squared_cdf(hi, dof) < p {
        hi *= 2.0;
        if hi > 1e6 {
            break;
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if chi_squared_cdf(mid, dof) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-10 * hi.max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}

// ---------------------------------------------------------------------------
// Gaussian density
// ---------------------------------------------------------------------------

/// Multivariate Gaussian pdf N(x; mean, cov). Returns 0 when `cov` is
/// singular.
pub fn gaussian_pdf(x: &DVec, mean: &DVec, cov: &DMat) -> f64 {
    let dim = x.len();
    let det = cov.determinant();
    if det.abs() < 1e-300 {
        return 0.0;
    }
    let inv = match cov.clone().try_inverse() {
        Some(inv) => inv,
        None => return 0.0,
    };
    let diff = x - mean;
    let m2 = (diff.transpose() * &inv * &diff)[(0, 0)];
    let norm = 1.0 / ((2.0 * PI).powf(dim as f64 / 2.0) * det.abs().sqrt());
    norm * (-0.5 * m2).exp()
}

// ---------------------------------------------------------------------------
// Covariance conditioning
// ---------------------------------------------------------------------------

/// Force exact symmetry: P <- (P + P^T) / 2.
pub fn symmetrize(p: &StateCov) -> StateCov {
    (p + p.transpose()) * 0.5
}

/// True if `p` is symmetric and all eigenvalues are >= -tol.
pub fn is_psd(p: &StateCov, tol: f64) -> bool {
    for i in 0..9 {
        for j in (i + 1)..9 {
            if (p[(i, j)] - p[(j, i)]).abs() > tol.max(1e-6) {
                return false;
            }
        }
    }
    let eig = symmetrize(p).symmetric_eigenvalues();
    eig.iter().all(|&l| l >= -tol)
}

/// Symmetrize and clamp negative eigenvalues to [`PSD_EPS`] (epsilon lift),
/// returning the nearest-PSD reconstruction. Cheap no-op when the matrix is
/// already PSD.
pub fn project_psd(p: &StateCov) -> StateCov {
    let sym = symmetrize(p);
    let eig = sym.symmetric_eigenvalues();
    if eig.iter().all(|&l| l >= 0.0) {
        return sym;
    }
    let se = nalgebra::SymmetricEigen::new(sym);
    let mut d = se.eigenvalues;
    for l in d.iter_mut() {
        if *l < PSD_EPS {
            *l = PSD_EPS;
        }
    }
    let q = se.eigenvectors;
    let recomposed = q * nalgebra::SMatrix::<f64, 9, 9>::from_diagonal(&d) * q.transpose();
    symmetrize(&recomposed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
