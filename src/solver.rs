//! Closed-form inversion of frictionless target trajectories.
//!
//! Clay targets are thrown, not shot: their flight is modelled as a
//! drag-free parabola, which makes the launch parameters recoverable in
//! closed form from the constraints the rulebooks actually specify (height
//! at 10 m downrange for trap, crossing height for skeet).

use std::error::Error;
use std::fmt;

use nalgebra::Vector3;

use crate::constants::{G_ACCEL_MPS2, NUMERICAL_TOLERANCE};

/// Failure of the two-point inversion.
///
/// The inversion divides by terms that vanish when the constraint points
/// coincide (or nearly do), and takes a square root that requires an
/// upward initial slope. Both cases are reported explicitly so callers can
/// skip the offending trajectory instead of propagating NaN.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Constraint geometry collapses a denominator to ~0.
    Degenerate { detail: &'static str },
    /// Constraints admit no real launch speed / upward elevation.
    NoRealSolution { detail: &'static str },
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverError::Degenerate { detail } => {
                write!(f, "degenerate two-point constraint: {detail}")
            }
            SolverError::NoRealSolution { detail } => {
                write!(f, "no physical launch solution: {detail}")
            }
        }
    }
}

impl Error for SolverError {}

/// Launch speed and elevation recovered by an inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchSolution {
    /// Muzzle speed of the thrown target (m/s)
    pub v0: f64,
    /// Elevation above the horizon (radians)
    pub elevation: f64,
}

/// Invert the parabola that passes through height `h10` at horizontal
/// distance `d10` from a ground-level launch and returns to the ground at
/// `d_end`.
pub fn solve_trap_two_point(d10: f64, h10: f64, d_end: f64) -> Result<LaunchSolution, SolverError> {
    if d_end.abs() < NUMERICAL_TOLERANCE {
        return Err(SolverError::Degenerate {
            detail: "carry distance is zero",
        });
    }
    let denom = d10 - (d10 * d10) / d_end;
    if denom.abs() < NUMERICAL_TOLERANCE {
        return Err(SolverError::Degenerate {
            detail: "calibration distance coincides with carry distance",
        });
    }
    let t = h10 / denom;
    if !(t > 0.0) {
        return Err(SolverError::NoRealSolution {
            detail: "launch slope is not upward",
        });
    }
    let v0 = (0.5 * G_ACCEL_MPS2 * d_end * (1.0 + t * t) / t).sqrt();
    if !v0.is_finite() {
        return Err(SolverError::NoRealSolution {
            detail: "launch speed is not finite",
        });
    }
    Ok(LaunchSolution {
        v0,
        elevation: t.atan(),
    })
}

/// Invert the parabola launched from height `z0` that passes through
/// `(d1, z1)` and `(d2, z2)` (horizontal distance, height).
pub fn solve_generic_two_point(
    z0: f64,
    d1: f64,
    z1: f64,
    d2: f64,
    z2: f64,
) -> Result<LaunchSolution, SolverError> {
    if d2.abs() < NUMERICAL_TOLERANCE {
        return Err(SolverError::Degenerate {
            detail: "second constraint distance is zero",
        });
    }
    let a = d1 - (d1 * d1) / d2;
    if a.abs() < NUMERICAL_TOLERANCE {
        return Err(SolverError::Degenerate {
            detail: "constraint distances coincide",
        });
    }
    let b = 1.0 - (d1 * d1) / (d2 * d2);
    let t = (z1 - z0 * b - z2 * (d1 * d1) / (d2 * d2)) / a;
    let k = (z0 + d2 * t - z2) / (d2 * d2);
    if !(k > 0.0) {
        return Err(SolverError::NoRealSolution {
            detail: "trajectory curvature is not downward",
        });
    }
    let v0 = (G_ACCEL_MPS2 * (1.0 + t * t) / (2.0 * k)).sqrt();
    if !v0.is_finite() {
        return Err(SolverError::NoRealSolution {
            detail: "launch speed is not finite",
        });
    }
    Ok(LaunchSolution {
        v0,
        elevation: t.atan(),
    })
}

/// Sample the closed-form frictionless path at ~`step` horizontal-distance
/// increments along bearing `az` (x = sin az, y = cos az), forcing the last
/// point exactly at `carry`. Always returns at least 2 points.
///
/// `v0`/`elevation` are assumed to come from a successful inversion, so the
/// horizontal speed is strictly positive.
pub fn generate_trajectory(
    origin: Vector3<f64>,
    az: f64,
    v0: f64,
    elevation: f64,
    carry: f64,
    step: f64,
) -> Vec<Vector3<f64>> {
    let (s_el, c_el) = elevation.sin_cos();
    let ux = az.sin();
    let uy = az.cos();
    let vxy = v0 * c_el;
    let vz = v0 * s_el;

    let n = if step > 0.0 {
        ((carry / step).floor() as usize + 1).max(2)
    } else {
        2
    };
    let mut pts = Vec::with_capacity(n);
    for i in 0..n {
        let d = if i == n - 1 { carry } else { i as f64 * step };
        let t = d / vxy;
        pts.push(Vector3::new(
            origin.x + ux * d,
            origin.y + uy * d,
            origin.z + vz * t - 0.5 * G_ACCEL_MPS2 * t * t,
        ));
    }
    pts
}
