//! The ballistic coupling engine.
//!
//! Couples shooter-side ballistics to the scene's target trajectories:
//! enumerates feasible aim directions over the shooting window, finds
//! deterministic worst-case ("control") shots per station, samples shot
//! dispersion by Monte Carlo, and assembles the impact envelope.
//!
//! The computation runs in ordered phases. Per-station work is
//! embarrassingly parallel and is fanned out with rayon; every station owns
//! its RNG stream and result buffers, and buffers are concatenated in
//! station order, so parallel runs are bit-identical to sequential ones.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{CouplingConfig, TimeSampling};
use crate::constants::{
    CONE_RAY_LENGTH_M, MAX_EXPORTED_IMPACTS, MAX_MANUAL_SHOTS, MIN_FINE_DT, MIN_REFINE_BAND,
    MIN_WINDOW_DT, NUMERICAL_TOLERANCE,
};
use crate::geom::{convex_hull_2d, norm_angle_rad, polygon_area_2d, Aabb};
use crate::integrator::{integrate_impact, integrate_path, BallisticEnv, PathSample};
use crate::rng::StationRng;
use crate::scene::{Discipline, Scene, Station, Trajectory, TrajectoryFilter};
use crate::trap_tables::TableId;
use crate::wind::wind_vector;

/// Fatal engine errors. Infeasible-but-valid inputs are *not* errors; they
/// come back as an `ok=false` result instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Configuration cannot be integrated at all (fails before phase 1).
    InvalidConfig { message: String },
    /// Cooperative cancellation was observed; no result was produced.
    Cancelled,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::InvalidConfig { message } => {
                write!(f, "invalid coupling configuration: {message}")
            }
            EngineError::Cancelled => write!(f, "coupling computation cancelled"),
        }
    }
}

impl Error for EngineError {}

/// Machine-readable reason for an infeasible (ok=false) result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No stations or trajectories matched the filters.
    NoStationsOrTrajectories,
    /// Manual time mode with an empty time list.
    ManualTimesEmpty,
    /// Every manual time point fell outside every trajectory's flight.
    ManualTimesOutOfRange,
    /// The shooting window (or sector clipping) retained no aim at all.
    NoAimsInWindow,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FailureReason::NoStationsOrTrajectories => "no stations or trajectories",
            FailureReason::ManualTimesEmpty => "manual time points empty",
            FailureReason::ManualTimesOutOfRange => {
                "no aims: manual time points out of trajectory range"
            }
            FailureReason::NoAimsInWindow => "no aims in window",
        };
        f.write_str(s)
    }
}

/// Worst-case shot categories tracked per station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShotKind {
    MaxRange,
    MaxDownrange,
    MaxAbsX,
    Manual,
}

impl ShotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShotKind::MaxRange => "maxRange",
            ShotKind::MaxDownrange => "maxDownrange",
            ShotKind::MaxAbsX => "maxAbsX",
            ShotKind::Manual => "manual",
        }
    }
}

/// Stable lookup key for a visualized shot, e.g. `maxRange|S3|trap_I_m8|t0.450`.
pub fn make_shot_key(kind: ShotKind, station_id: u32, traj_id: &str, t: f64) -> String {
    let tt = if t.is_finite() { t } else { 0.0 };
    format!("{}|S{station_id}|{traj_id}|t{tt:.3}", kind.as_str())
}

/// Deterministic worst-case shot for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlShot {
    pub kind: ShotKind,
    pub station_id: u32,
    pub traj_id: String,
    pub source_id: String,
    pub group_id: String,
    pub table: Option<TableId>,
    pub t: f64,
    pub aim_az_deg: f64,
    pub aim_el_deg: f64,
    pub target_pos: Vector3<f64>,
    pub impact: Vector3<f64>,
    /// Horizontal impact distance from the gun (m)
    pub range: f64,
}

/// Visualized shot with its full integrated polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalShot {
    pub kind: ShotKind,
    pub shot_key: String,
    pub station_id: u32,
    pub traj_id: String,
    pub source_id: String,
    pub group_id: String,
    pub t: f64,
    pub aim_az_deg: f64,
    pub aim_el_deg: f64,
    pub gun: Vector3<f64>,
    pub target_pos: Vector3<f64>,
    pub impact: Vector3<f64>,
    pub range: f64,
    pub clipped: bool,
    pub points: Vec<PathSample>,
}

/// Per-impact metadata, parallel to the impact list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactMeta {
    pub station_id: u32,
    pub az_deg: f64,
    pub el_deg: f64,
    pub v0: f64,
}

/// One shooting-cone boundary ray for visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConeRay {
    pub station_id: u32,
    pub az_deg: f64,
    pub el_deg: f64,
    pub start: Vector3<f64>,
    pub end: Vector3<f64>,
    pub center: bool,
}

/// Output of one coupling computation. Produced whole; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingResult {
    pub ok: bool,
    pub reason: Option<FailureReason>,
    pub station_count: usize,
    pub traj_count: usize,
    /// Monte Carlo impacts produced (before export capping)
    pub sample_count: usize,
    pub impacts: Vec<Vector3<f64>>,
    pub impacts_meta: Vec<ImpactMeta>,
    /// Impact envelope at z=0, counter-clockwise, implicit closure
    pub hull: Vec<Vector3<f64>>,
    pub hull_area: f64,
    pub bbox: Option<Aabb>,
    pub controls: Vec<ControlShot>,
    pub critical: Vec<CriticalShot>,
    pub cone_rays: Vec<ConeRay>,
}

impl CouplingResult {
    fn failure(reason: FailureReason) -> CouplingResult {
        CouplingResult {
            ok: false,
            reason: Some(reason),
            station_count: 0,
            traj_count: 0,
            sample_count: 0,
            impacts: Vec::new(),
            impacts_meta: Vec::new(),
            hull: Vec::new(),
            hull_area: 0.0,
            bbox: None,
            controls: Vec::new(),
            critical: Vec::new(),
            cone_rays: Vec::new(),
        }
    }
}

/// Shared cooperative-cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress observer: fraction in [0,1] (or None when indeterminate) plus a
/// phase label. Purely observational.
pub type ProgressFn<'a> = &'a (dyn Fn(Option<f64>, &str) + Sync);

/// Optional per-computation hooks.
#[derive(Default, Clone, Copy)]
pub struct ComputeHooks<'a> {
    pub progress: Option<ProgressFn<'a>>,
    pub cancel: Option<&'a CancelFlag>,
}

impl<'a> ComputeHooks<'a> {
    fn report(&self, fraction: Option<f64>, label: &str) {
        if let Some(cb) = self.progress {
            cb(fraction, label);
        }
    }

    fn check_cancel(&self) -> Result<(), EngineError> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(EngineError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// One retained aim: where a station's gun points at time `t` to track a
/// trajectory, plus the target position it points at.
#[derive(Debug, Clone)]
struct Aim {
    az: f64,
    el: f64,
    t: f64,
    traj_idx: usize,
    target_pos: Vector3<f64>,
}

/// Running (azimuth-offset, elevation) bounds of a station's aims,
/// pre-padded by 3 sigma of the angular dispersion.
#[derive(Debug, Clone, Copy)]
struct AimExtent {
    has: bool,
    min_daz: f64,
    max_daz: f64,
    min_el: f64,
    max_el: f64,
}

impl AimExtent {
    fn empty() -> AimExtent {
        AimExtent {
            has: false,
            min_daz: 0.0,
            max_daz: 0.0,
            min_el: 0.0,
            max_el: 0.0,
        }
    }

    fn include(&mut self, daz: f64, el: f64, pad_az: f64, pad_el: f64) {
        if !self.has {
            self.min_daz = daz - pad_az;
            self.max_daz = daz + pad_az;
            self.min_el = el - pad_el;
            self.max_el = el + pad_el;
            self.has = true;
        } else {
            self.min_daz = self.min_daz.min(daz - pad_az);
            self.max_daz = self.max_daz.max(daz + pad_az);
            self.min_el = self.min_el.min(el - pad_el);
            self.max_el = self.max_el.max(el + pad_el);
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    kind: ShotKind,
    traj_idx: usize,
    t: f64,
    az: f64,
    el: f64,
    target_pos: Vector3<f64>,
    impact: Vector3<f64>,
    range: f64,
}

impl Candidate {
    /// Strictly-better comparison in this candidate's own category.
    fn beats(&self, other: &Candidate) -> bool {
        match self.kind {
            ShotKind::MaxRange => self.range > other.range,
            ShotKind::MaxDownrange => self.impact.y > other.impact.y,
            ShotKind::MaxAbsX => self.impact.x.abs() > other.impact.x.abs(),
            ShotKind::Manual => false,
        }
    }
}

/// Everything phase 1/2 learned about one station.
struct StationState {
    aims: Vec<Aim>,
    best: [Option<Candidate>; 3],
    extent: AimExtent,
}

struct Normalized {
    window: Option<(f64, f64, f64)>,
    manual_times: Vec<f64>,
    adaptive: bool,
    env: BallisticEnv,
    pad_az: f64,
    pad_el: f64,
}

fn normalize(cfg: &CouplingConfig) -> Result<Normalized, EngineError> {
    let invalid = |message: String| EngineError::InvalidConfig { message };

    if !(cfg.integration_dt > 0.0 && cfg.integration_dt.is_finite()) {
        return Err(invalid(format!(
            "integration step must be positive and finite, got {}",
            cfg.integration_dt
        )));
    }
    if !(cfg.max_flight_time > 0.0 && cfg.max_flight_time.is_finite()) {
        return Err(invalid(format!(
            "max flight time must be positive and finite, got {}",
            cfg.max_flight_time
        )));
    }
    if !(cfg.v0_mean > 0.0 && cfg.v0_mean.is_finite()) {
        return Err(invalid(format!(
            "mean muzzle speed must be positive and finite, got {}",
            cfg.v0_mean
        )));
    }

    let k = cfg.drag_constant().ok_or_else(|| {
        invalid(format!(
            "derived drag constant is not physical \
             (diameter {} mm, density {} kg/m³, air density {} kg/m³, Cd {})",
            cfg.pellet_diameter_mm, cfg.pellet_density, cfg.air_density, cfg.drag_cd
        ))
    })?;

    let (window, manual_times, adaptive) = match &cfg.time {
        TimeSampling::Window { t0, t1, dt } => {
            if !(t0.is_finite() && t1.is_finite() && dt.is_finite()) {
                return Err(invalid("shooting window bounds must be finite".to_string()));
            }
            let a = t0.min(*t1).max(0.0);
            let b = t1.max(a);
            let step = dt.max(MIN_WINDOW_DT);
            (Some((a, b, step)), Vec::new(), cfg.adaptive)
        }
        TimeSampling::Manual { times } => {
            let mut ts: Vec<f64> = times.iter().copied().filter(|t| t.is_finite()).collect();
            ts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            ts.dedup_by(|a, b| (*a - *b).abs() <= 1e-6);
            // manual points are evaluated exactly; refinement is meaningless
            (None, ts, false)
        }
    };

    Ok(Normalized {
        window,
        manual_times,
        adaptive,
        env: BallisticEnv {
            k,
            wind: wind_vector(cfg.wind_speed, cfg.wind_bearing_deg),
        },
        pad_az: cfg.spread_az_sigma_deg.max(0.0).to_radians() * 3.0,
        pad_el: cfg.spread_el_sigma_deg.max(0.0).to_radians() * 3.0,
    })
}

fn aim_from_gun(gun: &Vector3<f64>, p: &Vector3<f64>) -> (f64, f64) {
    let d = p - gun;
    let az = d.x.atan2(d.y);
    let el = d.z.atan2(d.xy().norm());
    (az, el)
}

/// Trap stations only engage the three machines of their own group.
fn station_engages(scene: &Scene, station: &Station, tr: &Trajectory) -> bool {
    match scene.discipline {
        Discipline::Trap => tr.group_id == station.id.to_string(),
        Discipline::Skeet => true,
    }
}

fn sample_times(norm: &Normalized, tr: &Trajectory) -> Vec<f64> {
    let t_max = tr.flight_duration();
    match norm.window {
        Some((t0, t1, dt)) => {
            let t_a = t0.clamp(0.0, t_max);
            let t_b = t1.clamp(0.0, t_max);
            if t_b <= t_a + NUMERICAL_TOLERANCE {
                return Vec::new();
            }
            let n_steps = (((t_b - t_a) / dt).floor() as usize).max(1);
            (0..=n_steps)
                .map(|i| t_a + (t_b - t_a) * (i as f64 / n_steps as f64))
                .collect()
        }
        None => norm
            .manual_times
            .iter()
            .copied()
            .filter(|&t| t >= 0.0 && t <= t_max)
            .collect(),
    }
}

fn enumerate_station_aims(
    scene: &Scene,
    cfg: &CouplingConfig,
    norm: &Normalized,
    station: &Station,
    trajs: &[&Trajectory],
    hooks: &ComputeHooks,
    progress_counter: &AtomicUsize,
    progress_total: usize,
) -> Result<StationState, EngineError> {
    let mut state = StationState {
        aims: Vec::new(),
        best: [None, None, None],
        extent: AimExtent::empty(),
    };
    let gun = station.gun;
    let center_az = scene.sector.center_az_rad(&gun);
    let window_mode = norm.window.is_some();

    for (traj_idx, tr) in trajs.iter().enumerate() {
        if !station_engages(scene, station, tr) {
            continue;
        }
        for t in sample_times(norm, tr) {
            hooks.check_cancel()?;
            let target_pos = tr.position_at(t);
            if target_pos.z <= 0.0 {
                continue;
            }
            let (az, el) = aim_from_gun(&gun, &target_pos);
            if cfg.clip_sector && !scene.sector.contains(&gun, az, el) {
                continue;
            }

            state.aims.push(Aim {
                az,
                el,
                t,
                traj_idx,
                target_pos,
            });
            let daz = norm_angle_rad(az - center_az);
            state.extent.include(daz, el, norm.pad_az, norm.pad_el);

            // deterministic control-shot candidates exist only in window mode
            if window_mode {
                let imp = integrate_impact(
                    &gun,
                    az,
                    el,
                    cfg.v0_mean,
                    &norm.env,
                    cfg.integration_dt,
                    cfg.max_flight_time,
                    cfg.max_distance,
                );
                let range = (imp.point.xy() - gun.xy()).norm();
                for (slot, kind) in [ShotKind::MaxRange, ShotKind::MaxDownrange, ShotKind::MaxAbsX]
                    .into_iter()
                    .enumerate()
                {
                    let cand = Candidate {
                        kind,
                        traj_idx,
                        t,
                        az,
                        el,
                        target_pos,
                        impact: imp.point,
                        range,
                    };
                    match &state.best[slot] {
                        Some(best) if !cand.beats(best) => {}
                        _ => state.best[slot] = Some(cand),
                    }
                }
            }

            let done = progress_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 150 == 0 {
                let p = 0.02 + 0.13 * (done as f64 / progress_total.max(1) as f64);
                hooks.report(Some(p.min(0.15)), "coupling: collecting feasible aims");
            }
        }
    }
    Ok(state)
}

/// Re-sample a candidate's neighborhood at the fine step and keep the best.
fn refine_candidate(
    scene: &Scene,
    cfg: &CouplingConfig,
    norm: &Normalized,
    station: &Station,
    trajs: &[&Trajectory],
    cand: Candidate,
) -> Candidate {
    let tr = trajs[cand.traj_idx];
    let gun = station.gun;
    let t_max = tr.flight_duration();
    let band = cfg.refine_band.max(MIN_REFINE_BAND);
    let dt_fine = cfg.refine_dt.max(MIN_FINE_DT);

    let t_a = (cand.t - band).clamp(0.0, t_max);
    let t_b = (cand.t + band).clamp(0.0, t_max);
    if t_b <= t_a + NUMERICAL_TOLERANCE {
        return cand;
    }

    let mut best = cand;
    let n_steps = (((t_b - t_a) / dt_fine).floor() as usize).max(2);
    for i in 0..=n_steps {
        let t = t_a + (t_b - t_a) * (i as f64 / n_steps as f64);
        let target_pos = tr.position_at(t);
        if target_pos.z <= 0.0 {
            continue;
        }
        let (az, el) = aim_from_gun(&gun, &target_pos);
        if cfg.clip_sector && !scene.sector.contains(&gun, az, el) {
            continue;
        }
        let imp = integrate_impact(
            &gun,
            az,
            el,
            cfg.v0_mean,
            &norm.env,
            cfg.integration_dt,
            cfg.max_flight_time,
            cfg.max_distance,
        );
        let range = (imp.point.xy() - gun.xy()).norm();
        let cand = Candidate {
            kind: best.kind,
            traj_idx: best.traj_idx,
            t,
            az,
            el,
            target_pos,
            impact: imp.point,
            range,
        };
        if cand.beats(&best) {
            best = cand;
        }
    }
    best
}

fn control_shot(cand: &Candidate, station: &Station, trajs: &[&Trajectory]) -> ControlShot {
    let tr = trajs[cand.traj_idx];
    ControlShot {
        kind: cand.kind,
        station_id: station.id,
        traj_id: tr.id.clone(),
        source_id: tr.source_id.clone(),
        group_id: tr.group_id.clone(),
        table: tr.params.table,
        t: cand.t,
        aim_az_deg: cand.az.to_degrees(),
        aim_el_deg: cand.el.to_degrees(),
        target_pos: cand.target_pos,
        impact: cand.impact,
        range: cand.range,
    }
}

fn dedupe_controls(controls: Vec<(usize, ControlShot)>) -> Vec<(usize, ControlShot)> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(controls.len());
    for (station_idx, c) in controls {
        let key = (
            c.kind,
            c.station_id,
            c.traj_id.clone(),
            (c.t * 1000.0).round() as i64,
        );
        if seen.insert(key) {
            out.push((station_idx, c));
        }
    }
    out
}

struct StationSamples {
    impacts: Vec<Vector3<f64>>,
    meta: Vec<ImpactMeta>,
}

fn sample_station(
    scene: &Scene,
    cfg: &CouplingConfig,
    norm: &Normalized,
    station: &Station,
    state: &StationState,
    hooks: &ComputeHooks,
    done_counter: &AtomicUsize,
    total_samples: usize,
) -> Result<StationSamples, EngineError> {
    let mut out = StationSamples {
        impacts: Vec::new(),
        meta: Vec::new(),
    };
    if state.aims.is_empty() || cfg.n_samples == 0 {
        return Ok(out);
    }

    let gun = station.gun;
    let center_az = scene.sector.center_az_rad(&gun);
    let az_half = scene.sector.az_half_deg.to_radians();
    let el_min = scene.sector.el_min_deg.to_radians();
    let el_max = scene.sector.el_max_deg.to_radians();

    let mut rng = StationRng::for_station(cfg.seed, station.id);
    let n_total = cfg.n_samples;
    let base = n_total / state.aims.len();
    let mut rem = n_total - base * state.aims.len();

    out.impacts.reserve(n_total);
    out.meta.reserve(n_total);

    for aim in &state.aims {
        hooks.check_cancel()?;
        let mut m = base;
        if rem > 0 {
            m += 1;
            rem -= 1;
        }

        for _ in 0..m {
            let v0 = (cfg.v0_mean + rng.next_normal() * cfg.v0_sigma).max(1.0);
            let mut az = aim.az + (rng.next_normal() * cfg.spread_az_sigma_deg).to_radians();
            let mut el = aim.el + (rng.next_normal() * cfg.spread_el_sigma_deg).to_radians();

            if cfg.clip_sector {
                let daz = norm_angle_rad(az - center_az).clamp(-az_half, az_half);
                az = center_az + daz;
                el = el.clamp(el_min, el_max);
            }

            let imp = integrate_impact(
                &gun,
                az,
                el,
                v0,
                &norm.env,
                cfg.integration_dt,
                cfg.max_flight_time,
                cfg.max_distance,
            );
            out.impacts.push(imp.point);
            out.meta.push(ImpactMeta {
                station_id: station.id,
                az_deg: az.to_degrees(),
                el_deg: el.to_degrees(),
                v0,
            });

            let done = done_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 200 == 0 {
                let p = 0.16 + 0.80 * (done as f64 / total_samples.max(1) as f64);
                hooks.report(Some(p.min(0.96)), "coupling: Monte Carlo sampling");
            }
        }
    }
    Ok(out)
}

fn critical_from_path(
    kind: ShotKind,
    station: &Station,
    tr: &Trajectory,
    t: f64,
    az: f64,
    el: f64,
    target_pos: Vector3<f64>,
    impact: Vector3<f64>,
    range: f64,
    clipped: bool,
    points: Vec<PathSample>,
) -> CriticalShot {
    CriticalShot {
        kind,
        shot_key: make_shot_key(kind, station.id, &tr.id, t),
        station_id: station.id,
        traj_id: tr.id.clone(),
        source_id: tr.source_id.clone(),
        group_id: tr.group_id.clone(),
        t,
        aim_az_deg: az.to_degrees(),
        aim_el_deg: el.to_degrees(),
        gun: station.gun,
        target_pos,
        impact,
        range,
        clipped,
        points,
    }
}

/// Run one coupling computation against an immutable scene.
///
/// Infeasible inputs produce `Ok` results with `ok=false` and a reason;
/// only unintegrable configurations and cancellation are `Err`.
pub fn compute(
    scene: &Scene,
    cfg: &CouplingConfig,
    filter: &TrajectoryFilter,
    hooks: &ComputeHooks,
) -> Result<CouplingResult, EngineError> {
    let norm = normalize(cfg)?;
    hooks.check_cancel()?;

    let stations: Vec<&Station> = scene
        .stations
        .iter()
        .filter(|s| cfg.station.matches(s.id))
        .collect();
    let trajs: Vec<&Trajectory> = scene
        .trajectories
        .iter()
        .filter(|tr| filter.allows(tr))
        .collect();

    if stations.is_empty() || trajs.is_empty() {
        return Ok(CouplingResult::failure(FailureReason::NoStationsOrTrajectories));
    }
    let manual_mode = norm.window.is_none();
    if manual_mode && norm.manual_times.is_empty() {
        return Ok(CouplingResult::failure(FailureReason::ManualTimesEmpty));
    }

    debug!(
        "coupling: {} stations × {} trajectories, k={:.6e}",
        stations.len(),
        trajs.len(),
        norm.env.k
    );

    // ---- phase 1: feasible aims + deterministic candidates ----
    hooks.report(Some(0.02), "coupling: collecting feasible aims");
    let aim_counter = AtomicUsize::new(0);
    let aim_estimate = stations.len() * trajs.len() * 40;
    let mut station_states: Vec<StationState> = stations
        .par_iter()
        .map(|st| {
            enumerate_station_aims(
                scene,
                cfg,
                &norm,
                st,
                &trajs,
                hooks,
                &aim_counter,
                aim_estimate,
            )
        })
        .collect::<Result<_, _>>()?;

    let total_aims: usize = station_states.iter().map(|s| s.aims.len()).sum();
    if total_aims == 0 {
        let reason = if manual_mode {
            FailureReason::ManualTimesOutOfRange
        } else {
            FailureReason::NoAimsInWindow
        };
        return Ok(CouplingResult::failure(reason));
    }

    // ---- phase 2: adaptive refinement of the candidates ----
    if norm.adaptive {
        for (st, state) in stations.iter().zip(station_states.iter_mut()) {
            for slot in state.best.iter_mut() {
                if let Some(cand) = slot.take() {
                    *slot = Some(refine_candidate(scene, cfg, &norm, st, &trajs, cand));
                }
            }
        }
    }

    let mut controls_raw: Vec<(usize, ControlShot)> = Vec::new();
    for (idx, (st, state)) in stations.iter().zip(station_states.iter()).enumerate() {
        for cand in state.best.iter().flatten() {
            controls_raw.push((idx, control_shot(cand, st, &trajs)));
        }
    }
    let controls_deduped = dedupe_controls(controls_raw);

    // ---- phase 3: Monte Carlo dispersion sampling ----
    let stations_with_aims = station_states.iter().filter(|s| !s.aims.is_empty()).count();
    let total_samples = cfg.n_samples * stations_with_aims;
    hooks.report(
        Some(0.16),
        if total_samples > 0 {
            "coupling: Monte Carlo sampling"
        } else {
            "coupling: sampling skipped (no samples requested)"
        },
    );

    let done_counter = AtomicUsize::new(0);
    let per_station: Vec<StationSamples> = stations
        .par_iter()
        .zip(station_states.par_iter())
        .map(|(st, state)| {
            sample_station(scene, cfg, &norm, st, state, hooks, &done_counter, total_samples)
        })
        .collect::<Result<_, _>>()?;

    let mut impacts: Vec<Vector3<f64>> = Vec::new();
    let mut impacts_meta: Vec<ImpactMeta> = Vec::new();
    for s in per_station {
        impacts.extend(s.impacts);
        impacts_meta.extend(s.meta);
    }

    // ---- phase 4: visualization shots ----
    hooks.report(Some(0.97), "coupling: assembling critical shots and envelope");
    hooks.check_cancel()?;

    let mut critical: Vec<CriticalShot> = Vec::new();
    if manual_mode {
        let mut seen = std::collections::HashSet::new();
        'stations: for (st, state) in stations.iter().zip(station_states.iter()) {
            for aim in &state.aims {
                let tr = trajs[aim.traj_idx];
                let key = (st.id, tr.id.clone(), format!("{:.3}", aim.t));
                if !seen.insert(key) {
                    continue;
                }
                let path = integrate_path(
                    &st.gun,
                    aim.az,
                    aim.el,
                    cfg.v0_mean,
                    &norm.env,
                    cfg.integration_dt,
                    cfg.max_flight_time,
                    cfg.max_distance,
                );
                let last = match path.points.last() {
                    Some(last) => *last,
                    None => continue,
                };
                let impact = Vector3::new(last.pos.x, last.pos.y, last.pos.z.max(0.0));
                let range = (impact.xy() - st.gun.xy()).norm();
                critical.push(critical_from_path(
                    ShotKind::Manual,
                    st,
                    tr,
                    aim.t,
                    aim.az,
                    aim.el,
                    aim.target_pos,
                    impact,
                    range,
                    path.clipped,
                    path.points,
                ));
                if critical.len() >= MAX_MANUAL_SHOTS {
                    break 'stations;
                }
            }
        }
    } else {
        for (station_idx, c) in &controls_deduped {
            let st = stations[*station_idx];
            let tr = match trajs.iter().find(|tr| tr.id == c.traj_id) {
                Some(tr) => *tr,
                None => continue,
            };
            let (az, el) = aim_from_gun(&st.gun, &c.target_pos);
            let path = integrate_path(
                &st.gun,
                az,
                el,
                cfg.v0_mean,
                &norm.env,
                cfg.integration_dt,
                cfg.max_flight_time,
                cfg.max_distance,
            );
            critical.push(critical_from_path(
                c.kind,
                st,
                tr,
                c.t,
                az,
                el,
                c.target_pos,
                c.impact,
                c.range,
                path.clipped,
                path.points,
            ));
        }
    }

    // ---- phase 5: envelope assembly ----
    let controls: Vec<ControlShot> = controls_deduped.into_iter().map(|(_, c)| c).collect();

    let hull_input: Vec<Vector3<f64>> = if !impacts.is_empty() {
        impacts.clone()
    } else {
        controls.iter().map(|c| c.impact).collect()
    };
    let pts2d: Vec<[f64; 2]> = hull_input.iter().map(|p| [p.x, p.y]).collect();
    let hull2d = convex_hull_2d(&pts2d);
    let hull_area = polygon_area_2d(&hull2d);
    let hull: Vec<Vector3<f64>> = hull2d.iter().map(|p| Vector3::new(p[0], p[1], 0.0)).collect();
    let bbox = Aabb::of_points(hull_input.iter());

    let sample_count = impacts.len();
    if impacts.len() > MAX_EXPORTED_IMPACTS {
        let stride = impacts.len().div_ceil(MAX_EXPORTED_IMPACTS);
        impacts = impacts
            .into_iter()
            .step_by(stride)
            .collect();
        impacts_meta = impacts_meta.into_iter().step_by(stride).collect();
    }

    let mut cone_rays = Vec::new();
    for (st, state) in stations.iter().zip(station_states.iter()) {
        if !state.extent.has {
            continue;
        }
        let ext = &state.extent;
        let center_az = scene.sector.center_az_rad(&st.gun);
        let ray = |az: f64, el: f64, center: bool| {
            let dir = Vector3::new(az.sin() * el.cos(), az.cos() * el.cos(), el.sin());
            ConeRay {
                station_id: st.id,
                az_deg: az.to_degrees(),
                el_deg: el.to_degrees(),
                start: st.gun,
                end: st.gun + dir * CONE_RAY_LENGTH_M,
                center,
            }
        };
        for az in [center_az + ext.min_daz, center_az + ext.max_daz] {
            for el in [ext.min_el, ext.max_el] {
                cone_rays.push(ray(az, el, false));
            }
        }
        cone_rays.push(ray(center_az, (ext.min_el + ext.max_el) * 0.5, true));
    }

    hooks.report(Some(1.0), "coupling: done");

    Ok(CouplingResult {
        ok: true,
        reason: None,
        station_count: stations.len(),
        traj_count: trajs.len(),
        sample_count,
        impacts,
        impacts_meta,
        hull,
        hull_area,
        bbox,
        controls,
        critical,
        cone_rays,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::scene::StationSelect;
    use crate::scene_trap::build_trap_scene;

    fn trap_scene() -> Scene {
        build_trap_scene(&SceneConfig::default())
    }

    fn small_cfg() -> CouplingConfig {
        CouplingConfig {
            n_samples: 60,
            time: TimeSampling::Window {
                t0: 0.3,
                t1: 0.8,
                dt: 0.1,
            },
            ..CouplingConfig::default()
        }
    }

    #[test]
    fn test_runs_are_bit_identical() {
        let scene = trap_scene();
        let cfg = small_cfg();
        let filter = TrajectoryFilter::all();
        let a = compute(&scene, &cfg, &filter, &ComputeHooks::default()).unwrap();
        let b = compute(&scene, &cfg, &filter, &ComputeHooks::default()).unwrap();
        assert!(a.ok);
        assert_eq!(a.impacts.len(), b.impacts.len());
        for (x, y) in a.impacts.iter().zip(&b.impacts) {
            assert_eq!(x.x.to_bits(), y.x.to_bits());
            assert_eq!(x.y.to_bits(), y.y.to_bits());
            assert_eq!(x.z.to_bits(), y.z.to_bits());
        }
        assert_eq!(a.controls.len(), b.controls.len());
        for (x, y) in a.controls.iter().zip(&b.controls) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_seed_changes_output() {
        let scene = trap_scene();
        let filter = TrajectoryFilter::all();
        let a = compute(&scene, &small_cfg(), &filter, &ComputeHooks::default()).unwrap();
        let mut cfg = small_cfg();
        cfg.seed = 54321;
        let b = compute(&scene, &cfg, &filter, &ComputeHooks::default()).unwrap();
        assert_eq!(a.impacts.len(), b.impacts.len());
        assert!(a.impacts.iter().zip(&b.impacts).any(|(x, y)| x != y));
    }

    #[test]
    fn test_sample_accounting() {
        let scene = trap_scene();
        let cfg = small_cfg();
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        // every station engages 3 targets and retains aims, so each spends
        // its full per-station sample count
        assert_eq!(res.sample_count, cfg.n_samples * 5);
        assert_eq!(res.impacts.len(), res.impacts_meta.len());
    }

    #[test]
    fn test_trap_station_group_restriction() {
        let scene = trap_scene();
        let mut cfg = small_cfg();
        cfg.station = StationSelect::One(2);
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert!(res.ok);
        assert_eq!(res.station_count, 1);
        // every control/critical shot tracks a group-2 target
        assert!(!res.controls.is_empty());
        for c in &res.controls {
            assert_eq!(c.group_id, "2");
            assert_eq!(c.station_id, 2);
        }
        for m in &res.impacts_meta {
            assert_eq!(m.station_id, 2);
        }
    }

    #[test]
    fn test_control_kinds_present_and_deduped() {
        let scene = trap_scene();
        let res = compute(&scene, &small_cfg(), &TrajectoryFilter::all(), &ComputeHooks::default())
            .unwrap();
        assert!(res.controls.len() <= 15);
        let mut keys = std::collections::HashSet::new();
        for c in &res.controls {
            assert!(matches!(
                c.kind,
                ShotKind::MaxRange | ShotKind::MaxDownrange | ShotKind::MaxAbsX
            ));
            assert!(keys.insert((
                c.kind,
                c.station_id,
                c.traj_id.clone(),
                (c.t * 1000.0).round() as i64
            )));
            assert!(c.range <= CouplingConfig::default().max_distance + 10.0);
        }
        // window-mode criticals mirror the deduped controls
        assert_eq!(res.critical.len(), res.controls.len());
        for cr in &res.critical {
            assert!(cr.points.len() >= 2);
            assert!(cr.shot_key.contains(&format!("S{}", cr.station_id)));
        }
    }

    #[test]
    fn test_empty_filter_fails_structurally() {
        let scene = trap_scene();
        let filter = TrajectoryFilter::group("nonexistent");
        let res = compute(&scene, &small_cfg(), &filter, &ComputeHooks::default()).unwrap();
        assert!(!res.ok);
        assert_eq!(res.reason, Some(FailureReason::NoStationsOrTrajectories));
    }

    #[test]
    fn test_manual_times_empty_and_out_of_range() {
        let scene = trap_scene();
        let mut cfg = small_cfg();
        cfg.time = TimeSampling::Manual { times: vec![] };
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert_eq!(res.reason, Some(FailureReason::ManualTimesEmpty));

        cfg.time = TimeSampling::Manual {
            times: vec![500.0, 600.0],
        };
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert_eq!(res.reason, Some(FailureReason::ManualTimesOutOfRange));
    }

    #[test]
    fn test_manual_mode_visualizes_each_aim() {
        let scene = trap_scene();
        let mut cfg = small_cfg();
        cfg.n_samples = 0;
        cfg.time = TimeSampling::Manual {
            times: vec![0.4, 0.8],
        };
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert!(res.ok);
        assert!(res.controls.is_empty());
        // 5 stations × 3 targets × 2 times
        assert_eq!(res.critical.len(), 30);
        for cr in &res.critical {
            assert_eq!(cr.kind, ShotKind::Manual);
            assert!(cr.shot_key.starts_with("manual|"));
        }
    }

    #[test]
    fn test_invalid_drag_config_is_fatal() {
        let scene = trap_scene();
        let mut cfg = small_cfg();
        cfg.pellet_diameter_mm = -2.0;
        let err = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
    }

    #[test]
    fn test_cancellation_aborts_without_result() {
        let scene = trap_scene();
        let flag = CancelFlag::new();
        flag.cancel();
        let hooks = ComputeHooks {
            progress: None,
            cancel: Some(&flag),
        };
        let err = compute(&scene, &small_cfg(), &TrajectoryFilter::all(), &hooks).unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }

    #[test]
    fn test_hull_fallback_to_controls() {
        let scene = trap_scene();
        let mut cfg = small_cfg();
        cfg.n_samples = 0;
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert!(res.ok);
        assert_eq!(res.sample_count, 0);
        assert!(res.impacts.is_empty());
        assert!(!res.controls.is_empty());
        assert!(res.hull.len() >= 3);
        assert!(res.hull_area > 0.0);
    }

    #[test]
    fn test_cone_rays_per_station() {
        let scene = trap_scene();
        let res = compute(&scene, &small_cfg(), &TrajectoryFilter::all(), &ComputeHooks::default())
            .unwrap();
        // 4 corner rays + 1 center ray per station
        assert_eq!(res.cone_rays.len(), 5 * 5);
        let centers = res.cone_rays.iter().filter(|r| r.center).count();
        assert_eq!(centers, 5);
        for r in &res.cone_rays {
            let len = (r.end - r.start).norm();
            assert!((len - CONE_RAY_LENGTH_M).abs() < 1e-9);
        }
    }

    #[test]
    fn test_export_capped_by_uniform_stride() {
        let scene = trap_scene();
        let mut cfg = small_cfg();
        cfg.n_samples = 1200; // 5 stations ⇒ 6000 raw impacts
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert_eq!(res.sample_count, 6000);
        assert!(res.impacts.len() <= MAX_EXPORTED_IMPACTS);
        assert_eq!(res.impacts.len(), res.impacts_meta.len());
        assert_eq!(res.impacts.len(), 3000); // stride 2
    }

    #[test]
    fn test_progress_reported_and_bounded() {
        use std::sync::Mutex;
        let scene = trap_scene();
        let fractions = Mutex::new(Vec::new());
        let cb = |p: Option<f64>, _label: &str| {
            if let Some(p) = p {
                fractions.lock().unwrap().push(p);
            }
        };
        let hooks = ComputeHooks {
            progress: Some(&cb),
            cancel: None,
        };
        let mut cfg = small_cfg();
        cfg.station = StationSelect::One(3);
        compute(&scene, &cfg, &TrajectoryFilter::all(), &hooks).unwrap();
        let fractions = fractions.into_inner().unwrap();
        assert!(!fractions.is_empty());
        for p in &fractions {
            assert!((0.0..=1.0).contains(p));
        }
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[test]
    fn test_sector_clipping_can_exclude_everything() {
        let mut scene = trap_scene();
        // sector so narrow and low that nothing is aimable
        scene.sector.az_half_deg = 0.001;
        scene.sector.el_min_deg = 80.0;
        scene.sector.el_max_deg = 89.0;
        let mut cfg = small_cfg();
        cfg.clip_sector = true;
        let res = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default()).unwrap();
        assert!(!res.ok);
        assert_eq!(res.reason, Some(FailureReason::NoAimsInWindow));
    }

    #[test]
    fn test_adaptive_refinement_never_worsens_candidates() {
        let scene = trap_scene();
        let filter = TrajectoryFilter::all();
        let mut coarse = small_cfg();
        coarse.station = StationSelect::One(3);
        let base = compute(&scene, &coarse, &filter, &ComputeHooks::default()).unwrap();

        let mut refined_cfg = coarse.clone();
        refined_cfg.adaptive = true;
        let refined = compute(&scene, &refined_cfg, &filter, &ComputeHooks::default()).unwrap();

        let max_range = |r: &CouplingResult| {
            r.controls
                .iter()
                .filter(|c| c.kind == ShotKind::MaxRange)
                .map(|c| c.range)
                .fold(f64::NEG_INFINITY, f64::max)
        };
        assert!(max_range(&refined) >= max_range(&base) - 1e-12);
    }
}
