//! Result memoization and in-flight request management.
//!
//! The last successful coupling result is cached under a structural hash of
//! every input that affects the computation. Requests carry monotonically
//! increasing tokens: starting a new request cancels the in-flight one, and
//! a completing request whose token is stale is discarded so it can never
//! overwrite a newer result.

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fxhash::FxHasher64;
use log::debug;

use crate::config::{CouplingConfig, TimeSampling};
use crate::engine::{compute, CancelFlag, ComputeHooks, CouplingResult, EngineError, ProgressFn};
use crate::scene::{Discipline, Scene, StationSelect, TrajectoryFilter};

struct Signer(FxHasher64);

impl Signer {
    fn new() -> Signer {
        Signer(FxHasher64::default())
    }

    fn f64(&mut self, v: f64) {
        self.0.write_u64(v.to_bits());
    }

    fn opt_f64(&mut self, v: Option<f64>) {
        match v {
            Some(v) => {
                self.0.write_u8(1);
                self.f64(v);
            }
            None => self.0.write_u8(0),
        }
    }

    fn str(&mut self, s: &str) {
        self.0.write_usize(s.len());
        self.0.write(s.as_bytes());
    }

    fn finish(self) -> u64 {
        self.0.finish()
    }
}

/// Structural signature of one coupling computation's inputs.
pub fn coupling_signature(scene: &Scene, cfg: &CouplingConfig, filter: &TrajectoryFilter) -> u64 {
    let mut h = Signer::new();

    // scene geometry
    h.0.write_u8(match scene.discipline {
        Discipline::Trap => 0,
        Discipline::Skeet => 1,
    });
    h.f64(scene.sector.az_half_deg);
    h.f64(scene.sector.el_min_deg);
    h.f64(scene.sector.el_max_deg);
    h.opt_f64(scene.sector.center_az_deg);
    h.0.write_usize(scene.stations.len());
    for st in &scene.stations {
        h.0.write_u32(st.id);
        for i in 0..3 {
            h.f64(st.gun[i]);
        }
    }
    h.0.write_usize(scene.trajectories.len());
    for tr in &scene.trajectories {
        h.str(&tr.id);
        h.str(&tr.source_id);
        h.str(&tr.group_id);
        let origin = tr.origin();
        for i in 0..3 {
            h.f64(origin[i]);
        }
        h.f64(tr.params.az_deg);
        h.f64(tr.params.el_deg);
        h.f64(tr.params.v0);
        h.f64(tr.params.carry);
        h.opt_f64(tr.params.h10);
        h.opt_f64(tr.params.cross_z);
        match tr.params.table {
            Some(t) => h.str(t.as_str()),
            None => h.0.write_u8(0),
        }
    }

    // coupling configuration
    match cfg.station {
        StationSelect::All => h.0.write_u8(0),
        StationSelect::One(id) => {
            h.0.write_u8(1);
            h.0.write_u32(id);
        }
    }
    match &cfg.time {
        TimeSampling::Window { t0, t1, dt } => {
            h.0.write_u8(0);
            h.f64(*t0);
            h.f64(*t1);
            h.f64(*dt);
        }
        TimeSampling::Manual { times } => {
            h.0.write_u8(1);
            h.0.write_usize(times.len());
            for t in times {
                h.f64(*t);
            }
        }
    }
    h.0.write_u8(cfg.adaptive as u8);
    h.f64(cfg.refine_band);
    h.f64(cfg.refine_dt);
    h.f64(cfg.v0_mean);
    h.f64(cfg.v0_sigma);
    h.f64(cfg.spread_az_sigma_deg);
    h.f64(cfg.spread_el_sigma_deg);
    h.f64(cfg.pellet_diameter_mm);
    h.f64(cfg.pellet_density);
    h.f64(cfg.air_density);
    h.f64(cfg.drag_cd);
    h.f64(cfg.wind_speed);
    h.f64(cfg.wind_bearing_deg);
    h.f64(cfg.integration_dt);
    h.f64(cfg.max_flight_time);
    h.f64(cfg.max_distance);
    h.0.write_usize(cfg.n_samples);
    h.0.write_u32(cfg.seed);
    h.0.write_u8(cfg.clip_sector as u8);

    // filters (sets are ordered, so iteration order is stable)
    let mut side = |set: Option<&std::collections::BTreeSet<String>>| match set {
        Some(s) => {
            h.0.write_u8(1);
            h.0.write_usize(s.len());
            for k in s {
                h.str(k);
            }
        }
        None => h.0.write_u8(0),
    };
    side(filter.active_groups.as_ref());
    side(filter.active_sources.as_ref());
    h.0.write_usize(filter.disabled_groups.len());
    for k in &filter.disabled_groups {
        h.str(k);
    }
    h.0.write_usize(filter.disabled_sources.len());
    for k in &filter.disabled_sources {
        h.str(k);
    }

    h.finish()
}

/// Handle for one in-flight computation.
pub struct ComputeRequest {
    token: u64,
    signature: u64,
    pub cancel: CancelFlag,
}

/// Serializes coupling runs for one consumer: caches the last successful
/// result and supersedes in-flight computations when new requests arrive.
#[derive(Default)]
pub struct CouplingSession {
    latest_token: AtomicU64,
    inflight: Mutex<Option<CancelFlag>>,
    cache: Mutex<Option<(u64, Arc<CouplingResult>)>>,
}

impl CouplingSession {
    pub fn new() -> CouplingSession {
        CouplingSession::default()
    }

    /// Cached result for this signature, if the last successful run matches.
    pub fn cached(&self, signature: u64) -> Option<Arc<CouplingResult>> {
        let cache = self.cache.lock().unwrap();
        match cache.as_ref() {
            Some((sig, result)) if *sig == signature && result.ok => Some(Arc::clone(result)),
            _ => None,
        }
    }

    /// Start a new request, superseding (and cancelling) any in-flight one.
    pub fn begin(&self, signature: u64) -> ComputeRequest {
        let token = self.latest_token.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelFlag::new();
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(prev) = inflight.replace(cancel.clone()) {
            prev.cancel();
        }
        ComputeRequest {
            token,
            signature,
            cancel,
        }
    }

    /// Publish a finished computation. Returns `None` when the request is
    /// stale or was cancelled; the previously cached result then stands.
    pub fn finish(
        &self,
        request: &ComputeRequest,
        result: CouplingResult,
    ) -> Option<Arc<CouplingResult>> {
        if request.token != self.latest_token.load(Ordering::SeqCst) {
            debug!("discarding stale coupling result (token {})", request.token);
            return None;
        }
        if request.cancel.is_cancelled() {
            return None;
        }
        let result = Arc::new(result);
        if result.ok {
            *self.cache.lock().unwrap() = Some((request.signature, Arc::clone(&result)));
        }
        Some(result)
    }

    /// Cancel whatever is in flight without starting a new request.
    pub fn cancel_inflight(&self) {
        if let Some(flag) = self.inflight.lock().unwrap().as_ref() {
            flag.cancel();
        }
    }

    /// Drop the cached result (forced-refresh).
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    /// Memoized compute: reuse the cached result on a signature hit,
    /// otherwise run the engine as a fresh request. `Err(Cancelled)` is
    /// returned both for cooperative cancellation and for completions
    /// superseded by a newer request.
    pub fn compute_cached(
        &self,
        scene: &Scene,
        cfg: &CouplingConfig,
        filter: &TrajectoryFilter,
        progress: Option<ProgressFn>,
    ) -> Result<Arc<CouplingResult>, EngineError> {
        let signature = coupling_signature(scene, cfg, filter);
        if let Some(hit) = self.cached(signature) {
            debug!("coupling cache hit ({signature:#018x})");
            return Ok(hit);
        }
        let request = self.begin(signature);
        let hooks = ComputeHooks {
            progress,
            cancel: Some(&request.cancel),
        };
        let result = compute(scene, cfg, filter, &hooks)?;
        self.finish(&request, result).ok_or(EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::scene_trap::build_trap_scene;

    fn scene() -> Scene {
        build_trap_scene(&SceneConfig::default())
    }

    fn cfg() -> CouplingConfig {
        CouplingConfig {
            n_samples: 40,
            time: TimeSampling::Window {
                t0: 0.3,
                t1: 0.6,
                dt: 0.1,
            },
            ..CouplingConfig::default()
        }
    }

    #[test]
    fn test_signature_sensitivity() {
        let scene = scene();
        let filter = TrajectoryFilter::all();
        let base = coupling_signature(&scene, &cfg(), &filter);
        assert_eq!(base, coupling_signature(&scene, &cfg(), &filter));

        let mut c = cfg();
        c.seed = 999;
        assert_ne!(base, coupling_signature(&scene, &c, &filter));

        let mut c = cfg();
        c.wind_speed = 3.0;
        assert_ne!(base, coupling_signature(&scene, &c, &filter));

        let f = TrajectoryFilter::group("2");
        assert_ne!(base, coupling_signature(&scene, &cfg(), &f));

        let mut other_scene = scene.clone();
        other_scene.sector.az_half_deg = 10.0;
        assert_ne!(base, coupling_signature(&other_scene, &cfg(), &filter));
    }

    #[test]
    fn test_cache_hit_reuses_result() {
        let session = CouplingSession::new();
        let scene = scene();
        let filter = TrajectoryFilter::all();
        let first = session
            .compute_cached(&scene, &cfg(), &filter, None)
            .unwrap();
        let second = session
            .compute_cached(&scene, &cfg(), &filter, None)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        session.invalidate();
        let third = session
            .compute_cached(&scene, &cfg(), &filter, None)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn test_failed_results_are_not_cached() {
        let session = CouplingSession::new();
        let scene = scene();
        let filter = TrajectoryFilter::group("nonexistent");
        let res = session
            .compute_cached(&scene, &cfg(), &filter, None)
            .unwrap();
        assert!(!res.ok);
        let sig = coupling_signature(&scene, &cfg(), &filter);
        assert!(session.cached(sig).is_none());
    }

    #[test]
    fn test_stale_request_is_discarded() {
        let session = CouplingSession::new();
        let scene = scene();
        let filter = TrajectoryFilter::all();

        // seed the cache
        let cached = session
            .compute_cached(&scene, &cfg(), &filter, None)
            .unwrap();

        let mut other = cfg();
        other.seed = 777;
        let sig_other = coupling_signature(&scene, &other, &filter);
        let old_req = session.begin(sig_other);
        // a newer request supersedes (and cancels) the first
        let _new_req = session.begin(sig_other);
        assert!(old_req.cancel.is_cancelled());

        let hooks = ComputeHooks::default();
        let result = compute(&scene, &other, &filter, &hooks).unwrap();
        assert!(session.finish(&old_req, result).is_none());

        // the cached result is untouched
        let sig = coupling_signature(&scene, &cfg(), &filter);
        let still = session.cached(sig).unwrap();
        assert!(Arc::ptr_eq(&cached, &still));
    }

    #[test]
    fn test_cancellation_keeps_previous_cache() {
        let session = CouplingSession::new();
        let scene = scene();
        let filter = TrajectoryFilter::all();
        let cached = session
            .compute_cached(&scene, &cfg(), &filter, None)
            .unwrap();

        // cancel a fresh differing request before it starts integrating
        let mut other = cfg();
        other.seed = 31337;
        let request = session.begin(coupling_signature(&scene, &other, &filter));
        request.cancel.cancel();
        let hooks = ComputeHooks {
            progress: None,
            cancel: Some(&request.cancel),
        };
        assert_eq!(
            compute(&scene, &other, &filter, &hooks).unwrap_err(),
            EngineError::Cancelled
        );

        let sig = coupling_signature(&scene, &cfg(), &filter);
        assert!(Arc::ptr_eq(&session.cached(sig).unwrap(), &cached));
    }
}
