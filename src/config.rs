//! Flat configuration for scene building and the coupling computation.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_DISTANCE_M, DEFAULT_PELLET_DIAMETER_MM, LEAD_DENSITY, SPHERE_CD,
    STANDARD_AIR_DENSITY,
};
use crate::scene::{Discipline, StationSelect};
use crate::trap_tables::TableId;

/// How a scene's trajectories are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneProfile {
    /// Fixed throws from an official setting table (trap; skeet has no
    /// tables and samples its configured ranges instead).
    SettingTable,
    /// Randomized envelope sampling of the configured ranges;
    /// [`SceneConfig::corners_only`] degenerates it to the two extreme
    /// corner throws per machine.
    Envelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorConfig {
    pub az_half_deg: f64,
    pub el_min_deg: f64,
    pub el_max_deg: f64,
}

impl Default for SectorConfig {
    fn default() -> Self {
        SectorConfig {
            az_half_deg: 75.0,
            el_min_deg: 0.0,
            el_max_deg: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrapSceneConfig {
    pub table: TableId,
    /// Envelope sampling range for the height at 10 m (m)
    pub h10_min: f64,
    pub h10_max: f64,
    /// Envelope sampling half-range for throw azimuth (deg)
    pub az_max_deg: f64,
    /// Carry distance of every trap target (m)
    pub carry: f64,
}

impl Default for TrapSceneConfig {
    fn default() -> Self {
        TrapSceneConfig {
            table: TableId::I,
            h10_min: 1.5,
            h10_max: 3.0,
            az_max_deg: 45.0,
            carry: 76.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkeetSceneConfig {
    /// Height of the crossing point (m)
    pub cross_height: f64,
    /// Carry distance of every skeet target (m)
    pub carry: f64,
}

impl Default for SkeetSceneConfig {
    fn default() -> Self {
        SkeetSceneConfig {
            cross_height: 4.6,
            carry: 68.0,
        }
    }
}

/// Inputs to the scene builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub discipline: Discipline,
    pub profile: SceneProfile,
    /// Muzzle height above a station's ground position (m)
    pub gun_height: f64,
    /// Envelope-mode trajectories per machine (clamped to 1..=60)
    pub samples_per_source: usize,
    /// Horizontal-distance step of trajectory polylines (m)
    pub step_m: f64,
    /// Generate only the two extreme corner trajectories per machine
    pub corners_only: bool,
    pub sector: SectorConfig,
    pub trap: TrapSceneConfig,
    pub skeet: SkeetSceneConfig,
    /// Seed for envelope-mode sampling. `None` draws from entropy, which
    /// makes envelope scenes non-reproducible; setting-table scenes are
    /// deterministic either way.
    pub seed: Option<u64>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig {
            discipline: Discipline::Trap,
            profile: SceneProfile::SettingTable,
            gun_height: 1.50,
            samples_per_source: 18,
            step_m: 0.5,
            corners_only: false,
            sector: SectorConfig::default(),
            trap: TrapSceneConfig::default(),
            skeet: SkeetSceneConfig::default(),
            seed: None,
        }
    }
}

impl SceneConfig {
    pub fn clamped_samples_per_source(&self) -> usize {
        self.samples_per_source.clamp(1, 60)
    }
}

/// Time-sampling mode for aim enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimeSampling {
    /// Evenly spaced samples in `[t0, t1]` at step `dt`, clamped
    /// per-trajectory to its flight duration.
    Window { t0: f64, t1: f64, dt: f64 },
    /// Explicit time points; adaptive refinement is disabled and each time
    /// only applies to trajectories whose flight covers it.
    Manual { times: Vec<f64> },
}

impl Default for TimeSampling {
    fn default() -> Self {
        TimeSampling::Window {
            t0: 0.20,
            t1: 2.20,
            dt: 0.05,
        }
    }
}

/// Flat input to one coupling computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingConfig {
    pub station: StationSelect,
    pub time: TimeSampling,

    /// Refine control-shot times at a finer step around candidates
    pub adaptive: bool,
    /// Half-width of the refinement band around a candidate time (s)
    pub refine_band: f64,
    /// Refinement time step (s)
    pub refine_dt: f64,

    /// Mean muzzle speed of the shot column (m/s)
    pub v0_mean: f64,
    pub v0_sigma: f64,
    /// Angular dispersion of the pattern, 1 sigma (deg)
    pub spread_az_sigma_deg: f64,
    pub spread_el_sigma_deg: f64,

    pub pellet_diameter_mm: f64,
    /// Pellet material density (kg/m³)
    pub pellet_density: f64,
    pub air_density: f64,
    pub drag_cd: f64,

    pub wind_speed: f64,
    /// Blow-to bearing: 0° = +Y, 90° = +X
    pub wind_bearing_deg: f64,

    /// RK4 step (s)
    pub integration_dt: f64,
    /// Integration time cap (s)
    pub max_flight_time: f64,
    /// Horizontal travel cap from the gun (m)
    pub max_distance: f64,

    /// Monte Carlo samples per station
    pub n_samples: usize,
    pub seed: u32,

    /// Clamp aims and sampled directions into the station sector
    pub clip_sector: bool,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        CouplingConfig {
            station: StationSelect::All,
            time: TimeSampling::default(),
            adaptive: false,
            refine_band: 0.20,
            refine_dt: 0.01,
            v0_mean: 370.0,
            v0_sigma: 6.0,
            spread_az_sigma_deg: 1.2,
            spread_el_sigma_deg: 1.2,
            pellet_diameter_mm: DEFAULT_PELLET_DIAMETER_MM,
            pellet_density: LEAD_DENSITY,
            air_density: STANDARD_AIR_DENSITY,
            drag_cd: SPHERE_CD,
            wind_speed: 0.0,
            wind_bearing_deg: 90.0,
            integration_dt: 0.01,
            max_flight_time: 8.0,
            max_distance: DEFAULT_MAX_DISTANCE_M,
            n_samples: 3000,
            seed: 12345,
            clip_sector: false,
        }
    }
}

impl CouplingConfig {
    /// Quadratic-drag constant `k = ½ ρ C_d A / m` for a lead sphere of the
    /// configured diameter. `None` when any factor makes it non-physical.
    pub fn drag_constant(&self) -> Option<f64> {
        let dia = self.pellet_diameter_mm / 1000.0;
        if !(dia > 0.0 && self.air_density > 0.0 && self.drag_cd > 0.0 && self.pellet_density > 0.0)
        {
            return None;
        }
        let r = dia * 0.5;
        let area = std::f64::consts::PI * r * r;
        let mass = (4.0 / 3.0) * std::f64::consts::PI * r * r * r * self.pellet_density;
        let k = 0.5 * self.air_density * self.drag_cd * area / mass;
        k.is_finite().then_some(k)
    }
}

/// Parse a free-form manual time list ("0.2, 0.4; 0.6") into sorted,
/// de-duplicated seconds. Unparseable fragments are dropped.
pub fn parse_time_list(text: &str) -> Vec<f64> {
    let mut raw: Vec<f64> = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .collect();
    raw.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut out: Vec<f64> = Vec::with_capacity(raw.len());
    for t in raw.drain(..) {
        if out.last().map_or(true, |last| (t - last).abs() > 1e-6) {
            out.push(t);
        }
    }
    out
}
