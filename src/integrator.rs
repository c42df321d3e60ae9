//! Fixed-step RK4 pellet integration.
//!
//! One state vector `[x, y, z, vx, vy, vz]` advanced under constant gravity
//! and quadratic drag opposing the velocity relative to wind:
//! `a_drag = -k · |v_rel| · v_rel`. Ground intersection (z ≤ 0) is resolved
//! by linear interpolation between the two bracketing samples.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{G_ACCEL_MPS2, LOW_SPEED_FLOOR_MPS, MIN_DIVISION_THRESHOLD};

/// Integration environment: derived drag constant and wind vector.
#[derive(Debug, Clone, Copy)]
pub struct BallisticEnv {
    /// Quadratic drag constant `½ ρ C_d A / m` (1/m)
    pub k: f64,
    pub wind: Vector3<f64>,
}

/// Where a pellet came down.
///
/// `clipped` marks impacts estimated from an early exit (distance cap,
/// time cap, or the low-speed floor) instead of an actual ground crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impact {
    pub point: Vector3<f64>,
    pub time: f64,
    pub clipped: bool,
}

/// Integrated shot polyline for visualization; interior samples are
/// downsampled 1-in-3, endpoints are exact.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotPath {
    pub points: Vec<PathSample>,
    pub clipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSample {
    pub pos: Vector3<f64>,
    pub speed: f64,
}

fn deriv(s: &[f64; 6], env: &BallisticEnv) -> [f64; 6] {
    let rvx = s[3] - env.wind.x;
    let rvy = s[4] - env.wind.y;
    let rvz = s[5] - env.wind.z;
    let sp = (rvx * rvx + rvy * rvy + rvz * rvz).sqrt();
    [
        s[3],
        s[4],
        s[5],
        -env.k * sp * rvx,
        -env.k * sp * rvy,
        -G_ACCEL_MPS2 - env.k * sp * rvz,
    ]
}

/// One classical RK4 step.
pub fn rk4_step(state: &[f64; 6], dt: f64, env: &BallisticEnv) -> [f64; 6] {
    let k1 = deriv(state, env);
    let mut s2 = *state;
    for i in 0..6 {
        s2[i] = state[i] + 0.5 * dt * k1[i];
    }
    let k2 = deriv(&s2, env);
    let mut s3 = *state;
    for i in 0..6 {
        s3[i] = state[i] + 0.5 * dt * k2[i];
    }
    let k3 = deriv(&s3, env);
    let mut s4 = *state;
    for i in 0..6 {
        s4[i] = state[i] + dt * k3[i];
    }
    let k4 = deriv(&s4, env);
    let mut out = *state;
    for i in 0..6 {
        out[i] = state[i] + (dt / 6.0) * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
    }
    out
}

fn initial_state(gun: &Vector3<f64>, az: f64, el: f64, v0: f64) -> [f64; 6] {
    let c_el = el.cos();
    [
        gun.x,
        gun.y,
        gun.z,
        az.sin() * c_el * v0,
        az.cos() * c_el * v0,
        el.sin() * v0,
    ]
}

/// Integrate a shot to its impact estimate.
pub fn integrate_impact(
    gun: &Vector3<f64>,
    az: f64,
    el: f64,
    v0: f64,
    env: &BallisticEnv,
    dt: f64,
    max_t: f64,
    max_dist: f64,
) -> Impact {
    let mut state = initial_state(gun, az, el, v0);
    let mut t = 0.0;
    let n = (max_t / dt).ceil() as usize;

    for _ in 0..n {
        let prev = state;
        let prev_t = t;
        state = rk4_step(&state, dt, env);
        t += dt;

        let (x, y, z) = (state[0], state[1], state[2]);
        let dx = x - gun.x;
        let dy = y - gun.y;
        if (dx * dx + dy * dy).sqrt() > max_dist {
            return Impact {
                point: Vector3::new(x, y, z.max(0.0)),
                time: t,
                clipped: true,
            };
        }

        if z <= 0.0 && t > 0.0 {
            let z0 = prev[2];
            let alpha = z0 / (z0 - z + MIN_DIVISION_THRESHOLD);
            return Impact {
                point: Vector3::new(
                    prev[0] + (x - prev[0]) * alpha,
                    prev[1] + (y - prev[1]) * alpha,
                    0.0,
                ),
                time: prev_t + (t - prev_t) * alpha,
                clipped: false,
            };
        }

        let speed = (state[3] * state[3] + state[4] * state[4] + state[5] * state[5]).sqrt();
        if speed < LOW_SPEED_FLOOR_MPS {
            break;
        }
    }

    // time cap or low-speed exit: whatever distance is left is negligible
    Impact {
        point: Vector3::new(state[0], state[1], state[2].max(0.0)),
        time: t,
        clipped: true,
    }
}

/// Integrate a shot, keeping the polyline for visualization.
pub fn integrate_path(
    gun: &Vector3<f64>,
    az: f64,
    el: f64,
    v0: f64,
    env: &BallisticEnv,
    dt: f64,
    max_t: f64,
    max_dist: f64,
) -> ShotPath {
    let mut state = initial_state(gun, az, el, v0);
    let mut t = 0.0;
    let n = (max_t / dt).ceil() as usize;

    let speed0 = (state[3] * state[3] + state[4] * state[4] + state[5] * state[5]).sqrt();
    let mut points = vec![PathSample {
        pos: Vector3::new(state[0], state[1], state[2]),
        speed: speed0,
    }];
    let mut prev_speed = speed0;

    for i in 0..n {
        let prev = state;
        state = rk4_step(&state, dt, env);
        t += dt;

        let (x, y, z) = (state[0], state[1], state[2]);
        let speed = (state[3] * state[3] + state[4] * state[4] + state[5] * state[5]).sqrt();

        if i % 3 == 0 {
            points.push(PathSample {
                pos: Vector3::new(x, y, z),
                speed,
            });
        }

        let dx = x - gun.x;
        let dy = y - gun.y;
        if (dx * dx + dy * dy).sqrt() > max_dist {
            points.push(PathSample {
                pos: Vector3::new(x, y, z.max(0.0)),
                speed,
            });
            return ShotPath {
                points,
                clipped: true,
            };
        }

        if z <= 0.0 && t > 0.0 {
            let z0 = prev[2];
            let alpha = z0 / (z0 - z + MIN_DIVISION_THRESHOLD);
            points.push(PathSample {
                pos: Vector3::new(
                    prev[0] + (x - prev[0]) * alpha,
                    prev[1] + (y - prev[1]) * alpha,
                    0.0,
                ),
                speed: prev_speed + (speed - prev_speed) * alpha,
            });
            return ShotPath {
                points,
                clipped: false,
            };
        }

        prev_speed = speed;
        if speed < LOW_SPEED_FLOOR_MPS {
            break;
        }
    }

    let speed = (state[3] * state[3] + state[4] * state[4] + state[5] * state[5]).sqrt();
    points.push(PathSample {
        pos: Vector3::new(state[0], state[1], state[2].max(0.0)),
        speed,
    });
    ShotPath {
        points,
        clipped: true,
    }
}
