//! Trap range geometry and target trajectory generation.
//!
//! Five stations on the firing line (station 3 at the origin), a pit of 15
//! machines 15 m downrange in five groups of three. Throws come either
//! from an official setting table or from uniform envelope sampling of the
//! configured azimuth/height windows.

use log::warn;
use nalgebra::Vector3;

use crate::config::{SceneConfig, SceneProfile};
use crate::sampling::{envelope_rng, sample_range};
use crate::scene::{
    Discipline, Machine, MachineKind, Scene, Sector, Station, TargetKind, Trajectory,
    TrajectoryParams,
};
use crate::solver::{generate_trajectory, solve_trap_two_point};
use crate::trap_tables::{throw_setting, H10_DISTANCE_M};

const STATION_SPACING_M: f64 = 3.15;
const PIT_FRONT_Y_M: f64 = 15.0;
const MACHINE_Y_M: f64 = PIT_FRONT_Y_M + 0.5;
const GROUP_SPACING_M: f64 = 3.15;
const WITHIN_GROUP_M: f64 = 1.05;

pub fn build_trap_scene(cfg: &SceneConfig) -> Scene {
    let stations: Vec<Station> = (1..=5u32)
        .map(|i| {
            let x = (i as f64 - 3.0) * STATION_SPACING_M;
            Station {
                id: i,
                pos: Vector3::new(x, 0.0, 0.0),
                gun: Vector3::new(x, 0.0, cfg.gun_height),
            }
        })
        .collect();

    let mut machines = Vec::with_capacity(15);
    let mut idx = 1u32;
    for g in 0..5 {
        let cx = (g as f64 - 2.0) * GROUP_SPACING_M;
        for mx in [cx - WITHIN_GROUP_M, cx, cx + WITHIN_GROUP_M] {
            machines.push(Machine {
                id: idx.to_string(),
                kind: MachineKind::TrapMachine,
                group_id: (g + 1).to_string(),
                pos: Vector3::new(mx, MACHINE_Y_M, 0.0),
                release: None,
            });
            idx += 1;
        }
    }

    let use_setting_table = cfg.profile == SceneProfile::SettingTable;
    let corners_only = cfg.corners_only;
    let n_samples = cfg.clamped_samples_per_source();
    let carry = cfg.trap.carry;
    let mut rng = envelope_rng(cfg.seed);

    let mut trajectories = Vec::new();
    for (m_idx, machine) in machines.iter().enumerate() {
        let machine_no = m_idx as u32 + 1;
        if use_setting_table {
            // one fixed throw per machine
            let setting = match throw_setting(cfg.trap.table, machine_no) {
                Some(s) => s,
                None => continue,
            };
            let sol = match solve_trap_two_point(H10_DISTANCE_M, setting.h10_m, carry) {
                Ok(sol) => sol,
                Err(err) => {
                    warn!(
                        "trap machine {machine_no} (table {}): skipping throw: {err}",
                        cfg.trap.table
                    );
                    continue;
                }
            };
            let az = setting.az_deg.to_radians();
            trajectories.push(Trajectory {
                id: format!("trap_{}_m{}", cfg.trap.table, machine_no),
                source_id: machine.id.clone(),
                group_id: machine.group_id.clone(),
                kind: TargetKind::TrapTarget,
                params: TrajectoryParams {
                    az_deg: setting.az_deg,
                    el_deg: sol.elevation.to_degrees(),
                    v0: sol.v0,
                    carry,
                    table: Some(cfg.trap.table),
                    h10: Some(setting.h10_m),
                    cross_z: None,
                    cross_dist: None,
                },
                points: generate_trajectory(machine.pos, az, sol.v0, sol.elevation, carry, cfg.step_m),
            });
        } else {
            let az_max = cfg.trap.az_max_deg.to_radians();
            let n = if corners_only { 2 } else { n_samples };
            let azs = sample_range(&mut rng, -az_max, az_max, n, true);
            let hs = sample_range(&mut rng, cfg.trap.h10_min, cfg.trap.h10_max, n, true);
            let throws: Vec<(f64, f64)> = if corners_only {
                vec![(azs[0], hs[0]), (azs[n - 1], hs[n - 1])]
            } else {
                azs.iter()
                    .enumerate()
                    .map(|(i, &az)| (az, hs[i % hs.len()]))
                    .collect()
            };
            for (k, (az, h10)) in throws.into_iter().enumerate() {
                let sol = match solve_trap_two_point(H10_DISTANCE_M, h10, carry) {
                    Ok(sol) => sol,
                    Err(err) => {
                        warn!("trap machine {machine_no} sample {}: skipping throw: {err}", k + 1);
                        continue;
                    }
                };
                trajectories.push(Trajectory {
                    id: format!("trap_m{machine_no}_{}", k + 1),
                    source_id: machine.id.clone(),
                    group_id: machine.group_id.clone(),
                    kind: TargetKind::TrapTarget,
                    params: TrajectoryParams {
                        az_deg: az.to_degrees(),
                        el_deg: sol.elevation.to_degrees(),
                        v0: sol.v0,
                        carry,
                        table: None,
                        h10: Some(h10),
                        cross_z: None,
                        cross_dist: None,
                    },
                    points: generate_trajectory(
                        machine.pos,
                        az,
                        sol.v0,
                        sol.elevation,
                        carry,
                        cfg.step_m,
                    ),
                });
            }
        }
    }

    Scene {
        discipline: Discipline::Trap,
        stations,
        machines,
        sector: Sector {
            az_half_deg: cfg.sector.az_half_deg,
            el_min_deg: cfg.sector.el_min_deg,
            el_max_deg: cfg.sector.el_max_deg,
            center_az_deg: Some(0.0),
        },
        trajectories,
    }
}
