//! Skeet field geometry and target trajectory generation.
//!
//! Seven stations on a 19.2 m-radius arc whose 36.8 m chord is offset
//! 5.5 m from the field center, plus the fixed eighth station at the chord
//! midpoint. The high and low houses throw across a crossing point above
//! the field center; launch parameters are recovered from the crossing
//! height and the configured carry.

use log::warn;
use nalgebra::Vector3;

use crate::config::SceneConfig;
use crate::sampling::{envelope_rng, sample_range};
use crate::scene::{
    Discipline, Machine, MachineKind, Scene, Sector, Station, TargetKind, Trajectory,
    TrajectoryParams,
};
use crate::solver::{generate_trajectory, solve_generic_two_point};

const ARC_RADIUS_M: f64 = 19.2;
const CHORD_OFFSET_M: f64 = 5.5;
const CHORD_STEP_M: f64 = 8.13;
const HIGH_RELEASE_Z_M: f64 = 3.05;
const LOW_RELEASE_Z_M: f64 = 1.05;
/// Per-sample crossing-height jitter outside corners-only mode (m)
const CROSS_JITTER_M: f64 = 0.25;

pub fn build_skeet_scene(cfg: &SceneConfig) -> Scene {
    let gun_h = cfg.gun_height;

    // stations 1..7 along the arc, then rotated/shifted so the 1→7 chord
    // lies on the x-axis at y = CHORD_OFFSET_M
    let d_theta = 2.0 * (CHORD_STEP_M / (2.0 * ARC_RADIUS_M)).asin();
    let theta0 = (CHORD_OFFSET_M / ARC_RADIUS_M).asin();
    let theta_start = std::f64::consts::PI - theta0;
    let raw: Vec<Vector3<f64>> = (0..7)
        .map(|i| {
            let th = theta_start - i as f64 * d_theta;
            Vector3::new(ARC_RADIUS_M * th.cos(), ARC_RADIUS_M * th.sin(), 0.0)
        })
        .collect();

    let chord = raw[6] - raw[0];
    let rot = -chord.y.atan2(chord.x);
    let (sin_r, cos_r) = rot.sin_cos();
    let rotate = |p: &Vector3<f64>| {
        Vector3::new(p.x * cos_r - p.y * sin_r, p.x * sin_r + p.y * cos_r, 0.0)
    };
    let dy = CHORD_OFFSET_M - rotate(&raw[0]).y;

    let mut stations: Vec<Station> = raw
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let r = rotate(p);
            Station {
                id: i as u32 + 1,
                pos: Vector3::new(r.x, r.y + dy, 0.0),
                gun: Vector3::new(r.x, r.y + dy, gun_h),
            }
        })
        .collect();
    stations.push(Station {
        id: 8,
        pos: Vector3::new(0.0, CHORD_OFFSET_M, 0.0),
        gun: Vector3::new(0.0, CHORD_OFFSET_M, gun_h),
    });

    let st1 = stations[0].pos;
    let st7 = stations[6].pos;
    let high_release = Vector3::new(st1.x - 0.9, st1.y, HIGH_RELEASE_Z_M);
    let low_release = Vector3::new(st7.x + 0.9, st7.y + 0.75, LOW_RELEASE_Z_M);

    let machines = vec![
        Machine {
            id: "H".to_string(),
            kind: MachineKind::HighHouse,
            group_id: "H".to_string(),
            pos: Vector3::new(st1.x - 1.6, st1.y, 0.0),
            release: Some(high_release),
        },
        Machine {
            id: "L".to_string(),
            kind: MachineKind::LowHouse,
            group_id: "L".to_string(),
            pos: Vector3::new(st7.x + 1.6, st7.y, 0.0),
            release: Some(low_release),
        },
        Machine {
            id: "CROSS".to_string(),
            kind: MachineKind::CrossMarker,
            group_id: "CROSS".to_string(),
            pos: Vector3::new(0.0, 0.0, cfg.skeet.cross_height),
            release: None,
        },
    ];

    let corners_only = cfg.corners_only;
    let n_samples = cfg.clamped_samples_per_source();
    let carry = cfg.skeet.carry;
    let mut rng = envelope_rng(cfg.seed);

    let mut trajectories = Vec::new();
    for (source_id, release) in [("H", high_release), ("L", low_release)] {
        let n = if corners_only { 1 } else { n_samples };
        let jitter = if corners_only {
            vec![0.0]
        } else {
            sample_range(&mut rng, -CROSS_JITTER_M, CROSS_JITTER_M, n, false)
        };
        for i in 0..n {
            let cross_z = cfg.skeet.cross_height + jitter[i];
            // aim the throw at the field center
            let az = (-release.x).atan2(-release.y);
            let cross_dist = release.xy().norm();
            let sol = match solve_generic_two_point(release.z, cross_dist, cross_z, carry, 0.0) {
                Ok(sol) => sol,
                Err(err) => {
                    warn!("skeet house {source_id} sample {}: skipping throw: {err}", i + 1);
                    continue;
                }
            };
            trajectories.push(Trajectory {
                id: format!("skeet_{source_id}_{}", i + 1),
                source_id: source_id.to_string(),
                group_id: source_id.to_string(),
                kind: TargetKind::SkeetTarget,
                params: TrajectoryParams {
                    az_deg: az.to_degrees(),
                    el_deg: sol.elevation.to_degrees(),
                    v0: sol.v0,
                    carry,
                    table: None,
                    h10: None,
                    cross_z: Some(cross_z),
                    cross_dist: Some(cross_dist),
                },
                points: generate_trajectory(release, az, sol.v0, sol.elevation, carry, cfg.step_m),
            });
        }
    }

    Scene {
        discipline: Discipline::Skeet,
        stations,
        machines,
        sector: Sector {
            az_half_deg: cfg.sector.az_half_deg,
            el_min_deg: cfg.sector.el_min_deg,
            el_max_deg: cfg.sector.el_max_deg,
            center_az_deg: None,
        },
        trajectories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skeet_cfg() -> SceneConfig {
        SceneConfig {
            discipline: Discipline::Skeet,
            seed: Some(11),
            ..SceneConfig::default()
        }
    }

    #[test]
    fn test_station_layout() {
        let scene = build_skeet_scene(&skeet_cfg());
        assert_eq!(scene.stations.len(), 8);

        let st1 = scene.station(1).unwrap().pos;
        let st7 = scene.station(7).unwrap().pos;
        // stations 1 and 7 sit on the chord at y = 5.5
        assert!((st1.y - 5.5).abs() < 1e-9);
        assert!((st7.y - 5.5).abs() < 1e-9);
        // chord length 36.8, symmetric about x = 0
        assert!(((st7.x - st1.x) - 36.8).abs() < 0.15);
        assert!((st1.x + st7.x).abs() < 0.01);
        // station 4 is the top of the arc
        let st4 = scene.station(4).unwrap().pos;
        for s in &scene.stations[..7] {
            assert!(st4.y >= s.pos.y - 1e-9);
        }
        // every arc station is 19.2 m from the arc center
        let center_y = st1.y - (19.2_f64.powi(2) - st1.x.powi(2)).sqrt();
        for s in &scene.stations[..7] {
            let r = ((s.pos.x).powi(2) + (s.pos.y - center_y).powi(2)).sqrt();
            assert!((r - 19.2).abs() < 0.01, "station {} radius {r}", s.id);
        }
        // fixed eighth station at the chord midpoint
        let st8 = scene.station(8).unwrap();
        assert_eq!(st8.pos, Vector3::new(0.0, 5.5, 0.0));
        assert_eq!(st8.gun.z, 1.50);
    }

    #[test]
    fn test_houses_and_releases() {
        let scene = build_skeet_scene(&skeet_cfg());
        let high = scene.machines.iter().find(|m| m.id == "H").unwrap();
        let low = scene.machines.iter().find(|m| m.id == "L").unwrap();
        assert_eq!(high.kind, MachineKind::HighHouse);
        assert_eq!(low.kind, MachineKind::LowHouse);
        assert_eq!(high.release.unwrap().z, 3.05);
        assert_eq!(low.release.unwrap().z, 1.05);
        let cross = scene.machines.iter().find(|m| m.id == "CROSS").unwrap();
        assert!(!cross.is_thrower());
        assert_eq!(cross.pos.z, 4.6);
    }

    #[test]
    fn test_trajectories_cross_near_center_height() {
        let mut cfg = skeet_cfg();
        cfg.corners_only = true;
        let scene = build_skeet_scene(&cfg);
        assert_eq!(scene.trajectories.len(), 2);
        for tr in &scene.trajectories {
            let cross_z = tr.params.cross_z.unwrap();
            assert_eq!(cross_z, 4.6);
            // the polyline passes near the crossing height above the center
            let release = tr.origin();
            let closest = tr
                .points
                .iter()
                .min_by(|a, b| a.xy().norm().partial_cmp(&b.xy().norm()).unwrap())
                .unwrap();
            assert!(closest.xy().norm() < 0.5, "path misses field center");
            assert!((closest.z - cross_z).abs() < 0.05);
            assert!(release.xy().norm() > 17.0);
        }
    }

    #[test]
    fn test_jittered_sampling_counts_and_bounds() {
        let mut cfg = skeet_cfg();
        cfg.samples_per_source = 10;
        let scene = build_skeet_scene(&cfg);
        assert_eq!(scene.trajectories.len(), 20);
        for tr in &scene.trajectories {
            let dz = tr.params.cross_z.unwrap() - 4.6;
            assert!(dz.abs() <= 0.25 + 1e-9);
        }
        // same seed reproduces the scene
        let again = build_skeet_scene(&cfg);
        assert_eq!(scene, again);
    }

    #[test]
    fn test_sector_faces_field_center() {
        let scene = build_skeet_scene(&skeet_cfg());
        assert_eq!(scene.sector.center_az_deg, None);
    }
}
