//! # clayrange
//!
//! Clay-target range geometry and shooter-side ballistics coupling.
//!
//! The crate models trap and skeet fields (stations, machines, thrown
//! target trajectories) and couples shotgun ballistics to them: per
//! station it enumerates feasible aim directions over a shooting window,
//! finds deterministic worst-case shots, samples pellet dispersion by
//! Monte Carlo under gravity, quadratic drag and wind, and assembles the
//! impact envelope ("danger zone") with its convex hull.
//!
//! Typical use:
//!
//! ```
//! use clayrange::{build_scene, compute, ComputeHooks, CouplingConfig, SceneConfig, TrajectoryFilter};
//!
//! let scene = build_scene(&SceneConfig::default());
//! let cfg = CouplingConfig {
//!     n_samples: 200,
//!     ..CouplingConfig::default()
//! };
//! let result = compute(&scene, &cfg, &TrajectoryFilter::all(), &ComputeHooks::default())
//!     .expect("valid configuration");
//! assert!(result.ok);
//! assert!(result.hull_area > 0.0);
//! ```

pub use cache::{coupling_signature, ComputeRequest, CouplingSession};
pub use config::{
    parse_time_list, CouplingConfig, SceneConfig, SceneProfile, SectorConfig, SkeetSceneConfig,
    TimeSampling, TrapSceneConfig,
};
pub use engine::{
    compute, make_shot_key, CancelFlag, ComputeHooks, ConeRay, ControlShot, CouplingResult,
    CriticalShot, EngineError, FailureReason, ImpactMeta, ProgressFn, ShotKind,
};
pub use geom::{convex_hull_2d, polygon_area_2d, Aabb};
pub use integrator::{BallisticEnv, Impact, PathSample, ShotPath};
pub use rng::StationRng;
pub use scene::{
    Discipline, Machine, MachineKind, Scene, Sector, Station, StationSelect, TargetKind,
    Trajectory, TrajectoryFilter, TrajectoryParams,
};
pub use scene_skeet::build_skeet_scene;
pub use scene_trap::build_trap_scene;
pub use solver::{
    generate_trajectory, solve_generic_two_point, solve_trap_two_point, LaunchSolution, SolverError,
};
pub use trap_tables::{throw_setting, TableId, ThrowSetting};

pub mod cache;
pub mod config;
pub mod constants;
pub mod engine;
pub mod geom;
pub mod integrator;
pub mod rng;
mod sampling;
pub mod scene;
pub mod scene_skeet;
pub mod scene_trap;
pub mod solver;
pub mod trap_tables;
pub mod wind;

/// Build the scene for the configured discipline.
pub fn build_scene(cfg: &SceneConfig) -> Scene {
    match cfg.discipline {
        Discipline::Trap => build_trap_scene(cfg),
        Discipline::Skeet => build_skeet_scene(cfg),
    }
}
