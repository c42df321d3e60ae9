//! Range scene data model shared by the builders and the coupling engine.
//!
//! A `Scene` is built once per configuration and never mutated afterwards;
//! the engine and any rendering/export consumers only read it.

use std::collections::BTreeSet;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::trap_tables::TableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    Trap,
    Skeet,
}

/// A shooting position: ground point plus the muzzle point above it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: u32,
    pub pos: Vector3<f64>,
    pub gun: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    TrapMachine,
    HighHouse,
    LowHouse,
    /// Marker for the skeet crossing point; throws nothing.
    CrossMarker,
}

/// A target thrower (or the skeet crossing-point marker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub kind: MachineKind,
    pub group_id: String,
    pub pos: Vector3<f64>,
    /// Point the target actually appears from, when distinct from `pos`.
    pub release: Option<Vector3<f64>>,
}

impl Machine {
    pub fn is_thrower(&self) -> bool {
        self.kind != MachineKind::CrossMarker
    }
}

/// Launch parameters a trajectory was solved from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryParams {
    pub az_deg: f64,
    pub el_deg: f64,
    /// Target launch speed (m/s)
    pub v0: f64,
    /// Horizontal carry distance (m)
    pub carry: f64,
    /// Trap: setting scheme the throw was taken from
    pub table: Option<TableId>,
    /// Trap: height at 10 m downrange the solve was constrained to
    pub h10: Option<f64>,
    /// Skeet: crossing height the solve was constrained to
    pub cross_z: Option<f64>,
    /// Skeet: horizontal distance from release to the crossing point
    pub cross_dist: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    TrapTarget,
    SkeetTarget,
}

/// One thrown-target flight path: solved launch parameters plus the
/// frictionless polyline sampled along it. Points are ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: String,
    pub source_id: String,
    pub group_id: String,
    pub kind: TargetKind,
    pub params: TrajectoryParams,
    pub points: Vec<Vector3<f64>>,
}

impl Trajectory {
    pub fn origin(&self) -> Vector3<f64> {
        self.points[0]
    }

    /// Flight duration implied by carry distance and horizontal speed.
    pub fn flight_duration(&self) -> f64 {
        let el = self.params.el_deg.to_radians();
        let vxy = self.params.v0 * el.cos();
        self.params.carry / (vxy + crate::constants::MIN_DIVISION_THRESHOLD)
    }

    /// Instantaneous target position from frictionless kinematics.
    pub fn position_at(&self, t: f64) -> Vector3<f64> {
        let p0 = self.origin();
        let az = self.params.az_deg.to_radians();
        let el = self.params.el_deg.to_radians();
        let vxy = self.params.v0 * el.cos();
        let vz = self.params.v0 * el.sin();
        Vector3::new(
            p0.x + az.sin() * vxy * t,
            p0.y + az.cos() * vxy * t,
            p0.z + vz * t - 0.5 * crate::constants::G_ACCEL_MPS2 * t * t,
        )
    }
}

/// Permitted aiming cone of a station.
///
/// `center_az_deg` is the bearing of the cone axis; `None` means the axis
/// points from each gun toward the field center (skeet convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub az_half_deg: f64,
    pub el_min_deg: f64,
    pub el_max_deg: f64,
    pub center_az_deg: Option<f64>,
}

impl Sector {
    /// Cone-axis bearing for a station (radians).
    pub fn center_az_rad(&self, gun: &Vector3<f64>) -> f64 {
        match self.center_az_deg {
            Some(deg) => deg.to_radians(),
            None => (-gun.x).atan2(-gun.y),
        }
    }

    /// Whether an aim direction falls inside the cone for a given gun.
    pub fn contains(&self, gun: &Vector3<f64>, az_rad: f64, el_rad: f64) -> bool {
        let tol = crate::constants::NUMERICAL_TOLERANCE;
        let d_az = crate::geom::norm_angle_rad(az_rad - self.center_az_rad(gun)).abs();
        let el_deg = el_rad.to_degrees();
        d_az <= self.az_half_deg.to_radians() + tol
            && el_deg >= self.el_min_deg - tol
            && el_deg <= self.el_max_deg + tol
    }
}

/// Immutable scene handed to the coupling engine and to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub discipline: Discipline,
    pub stations: Vec<Station>,
    pub machines: Vec<Machine>,
    pub sector: Sector,
    pub trajectories: Vec<Trajectory>,
}

impl Scene {
    pub fn station(&self, id: u32) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn trajectory(&self, id: &str) -> Option<&Trajectory> {
        self.trajectories.iter().find(|t| t.id == id)
    }
}

/// Which stations a coupling run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StationSelect {
    #[default]
    All,
    One(u32),
}

impl StationSelect {
    pub fn matches(&self, id: u32) -> bool {
        match self {
            StationSelect::All => true,
            StationSelect::One(want) => *want == id,
        }
    }
}

/// Explicit group/source participation for one coupling run.
///
/// `active_*` of `None` means "everything participates"; `Some(set)`
/// restricts to members of the set. `disabled_*` subtracts individually
/// switched-off entries on top of that. Sets are ordered so the filter
/// hashes stably into the result-cache signature.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrajectoryFilter {
    pub active_groups: Option<BTreeSet<String>>,
    pub active_sources: Option<BTreeSet<String>>,
    pub disabled_groups: BTreeSet<String>,
    pub disabled_sources: BTreeSet<String>,
}

impl TrajectoryFilter {
    /// Everything participates.
    pub fn all() -> TrajectoryFilter {
        TrajectoryFilter::default()
    }

    /// Restrict to a single group.
    pub fn group(group_id: impl Into<String>) -> TrajectoryFilter {
        TrajectoryFilter {
            active_groups: Some(std::iter::once(group_id.into()).collect()),
            ..TrajectoryFilter::default()
        }
    }

    /// Restrict to a single source machine.
    pub fn source(source_id: impl Into<String>) -> TrajectoryFilter {
        TrajectoryFilter {
            active_sources: Some(std::iter::once(source_id.into()).collect()),
            ..TrajectoryFilter::default()
        }
    }

    pub fn allows(&self, tr: &Trajectory) -> bool {
        if let Some(groups) = &self.active_groups {
            if !groups.contains(&tr.group_id) {
                return false;
            }
        }
        if let Some(sources) = &self.active_sources {
            if !sources.contains(&tr.source_id) {
                return false;
            }
        }
        !self.disabled_groups.contains(&tr.group_id) && !self.disabled_sources.contains(&tr.source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traj(group: &str, source: &str) -> Trajectory {
        Trajectory {
            id: format!("{group}_{source}"),
            source_id: source.to_string(),
            group_id: group.to_string(),
            kind: TargetKind::TrapTarget,
            params: TrajectoryParams {
                az_deg: 0.0,
                el_deg: 30.0,
                v0: 25.0,
                carry: 76.0,
                table: None,
                h10: None,
                cross_z: None,
                cross_dist: None,
            },
            points: vec![Vector3::zeros(), Vector3::new(0.0, 76.0, 0.0)],
        }
    }

    #[test]
    fn test_filter_default_allows_everything() {
        let f = TrajectoryFilter::all();
        assert!(f.allows(&traj("1", "2")));
        assert!(f.allows(&traj("H", "H")));
    }

    #[test]
    fn test_filter_active_and_disabled() {
        let mut f = TrajectoryFilter::group("3");
        assert!(f.allows(&traj("3", "8")));
        assert!(!f.allows(&traj("2", "5")));
        f.disabled_sources.insert("8".to_string());
        assert!(!f.allows(&traj("3", "8")));
        assert!(f.allows(&traj("3", "9")));
    }

    #[test]
    fn test_flight_duration_matches_carry() {
        let tr = traj("1", "1");
        let t_end = tr.flight_duration();
        let p = tr.position_at(t_end);
        let d = ((p.x - tr.origin().x).powi(2) + (p.y - tr.origin().y).powi(2)).sqrt();
        assert!((d - tr.params.carry).abs() < 1e-6);
    }

    #[test]
    fn test_sector_contains_trap_convention() {
        let sector = Sector {
            az_half_deg: 45.0,
            el_min_deg: 0.0,
            el_max_deg: 60.0,
            center_az_deg: Some(0.0),
        };
        let gun = Vector3::new(0.0, 0.0, 1.5);
        assert!(sector.contains(&gun, 0.0, 0.3));
        assert!(sector.contains(&gun, 44.0_f64.to_radians(), 0.3));
        assert!(!sector.contains(&gun, 46.0_f64.to_radians(), 0.3));
        assert!(!sector.contains(&gun, 0.0, 61.0_f64.to_radians()));
        assert!(!sector.contains(&gun, 0.0, -0.1));
    }

    #[test]
    fn test_sector_center_toward_field_center() {
        let sector = Sector {
            az_half_deg: 75.0,
            el_min_deg: 0.0,
            el_max_deg: 60.0,
            center_az_deg: None,
        };
        // gun on the +x side: center bearing points along -x
        let gun = Vector3::new(10.0, 0.0, 1.5);
        let c = sector.center_az_rad(&gun);
        assert!((c - (-std::f64::consts::FRAC_PI_2)).abs() < 1e-12);
    }
}
