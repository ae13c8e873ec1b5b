//! Ground-truth target trajectories.
//!
//! Each target carries a 6-DOF true state [px,py,pz,vx,vy,vz] and a
//! [`MotionSpec`] describing how it moves; the simulator steps targets
//! forward each frame.

use serde::{Deserialize, Serialize};

/// Motion model for a simulated target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Straight line at constant speed
    ConstantVelocity,
    /// Constant turn rate on the XY plane; `omega` = yaw rate (rad/s)
    ConstantTurn { omega: f64 },
    /// Constant acceleration (m/s²)
    ConstantAccel { ax: f64, ay: f64, az: f64 },
}

/// A simulated target with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    /// True state [px, py, pz, vx, vy, vz]
    pub state: [f64; 6],
    pub motion: MotionSpec,
    /// No measurements before this time (seconds)
    pub appear_at: Option<f64>,
    /// No measurements at or after this time (seconds)
    pub disappear_at: Option<f64>,
}

impl Target {
    pub fn new(id: u64, pos: [f64; 3], vel: [f64; 3], motion: MotionSpec) -> Self {
        Self {
            id,
            state: [pos[0], pos[1], pos[2], vel[0], vel[1], vel[2]],
            motion,
            appear_at: None,
            disappear_at: None,
        }
    }

    /// Propagate the true state by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let s = &mut self.state;
        match self.motion {
            MotionSpec::ConstantVelocity => {
                s[0] += s[3] * dt;
                s[1] += s[4] * dt;
                s[2] += s[5] * dt;
            }
            MotionSpec::ConstantTurn { omega } => {
                let v = (s[3] * s[3] + s[4] * s[4]).sqrt();
                let heading = s[4].atan2(s[3]);
                let new_heading = heading + omega * dt;
                s[0] += v * heading.cos() * dt;
                s[1] += v * heading.sin() * dt;
                s[2] += s[5] * dt;
                s[3] = v * new_heading.cos();
                s[4] = v * new_heading.sin();
            }
            MotionSpec::ConstantAccel { ax, ay, az } => {
                s[0] += s[3] * dt + 0.5 * ax * dt * dt;
                s[1] += s[4] * dt + 0.5 * ay * dt * dt;
                s[2] += s[5] * dt + 0.5 * az * dt * dt;
                s[3] += ax * dt;
                s[4] += ay * dt;
                s[5] += az * dt;
            }
        }
    }

    /// True if the target produces returns at time `t`.
    pub fn is_active(&self, t: f64) -> bool {
        if let Some(appear) = self.appear_at {
            if t < appear {
                return false;
            }
        }
        if let Some(disappear) = self.disappear_at {
            if t >= disappear {
                return false;
            }
        }
        true
    }
}
