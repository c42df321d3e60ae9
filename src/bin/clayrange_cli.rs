use std::error::Error;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

use clayrange::{
    build_scene, parse_time_list, CouplingConfig, CouplingSession, Discipline, SceneConfig,
    SceneProfile, ShotKind, StationSelect, TimeSampling, TrajectoryFilter,
};

#[derive(Parser)]
#[command(name = "clayrange")]
#[command(version = "0.1.0")]
#[command(about = "Clay-target range ballistics coupling calculator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a range scene and print it as JSON
    Scene {
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Run the ballistic coupling against a scene
    Couple {
        #[command(flatten)]
        scene: SceneArgs,
        #[command(flatten)]
        couple: CoupleArgs,
    },
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum CliDiscipline {
    Trap,
    Skeet,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum CliProfile {
    /// Fixed throws from an official setting table
    SettingTable,
    /// Randomized envelope sampling
    Envelope,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
struct SceneArgs {
    #[arg(long, value_enum, default_value_t = CliDiscipline::Trap)]
    discipline: CliDiscipline,

    #[arg(long, value_enum, default_value_t = CliProfile::SettingTable)]
    profile: CliProfile,

    /// Trap setting table (I..IX)
    #[arg(long, default_value = "I")]
    table: String,

    /// Muzzle height above the station (m)
    #[arg(long, default_value_t = 1.5)]
    gun_height: f64,

    /// Envelope-mode trajectories per machine
    #[arg(long, default_value_t = 18)]
    samples_per_source: usize,

    /// Trajectory polyline step (m)
    #[arg(long, default_value_t = 0.5)]
    step: f64,

    /// Only the two extreme corner throws per machine
    #[arg(long)]
    corners_only: bool,

    /// Seed for envelope sampling (omit for entropy)
    #[arg(long)]
    scene_seed: Option<u64>,

    /// Sector azimuth half-angle (deg)
    #[arg(long, default_value_t = 75.0)]
    az_half: f64,

    /// Sector minimum elevation (deg)
    #[arg(long, default_value_t = 0.0)]
    el_min: f64,

    /// Sector maximum elevation (deg)
    #[arg(long, default_value_t = 60.0)]
    el_max: f64,

    /// Trap target carry distance (m)
    #[arg(long, default_value_t = 76.0)]
    trap_carry: f64,

    /// Trap envelope h10 minimum (m)
    #[arg(long, default_value_t = 1.5)]
    trap_h10_min: f64,

    /// Trap envelope h10 maximum (m)
    #[arg(long, default_value_t = 3.0)]
    trap_h10_max: f64,

    /// Trap envelope azimuth half-range (deg)
    #[arg(long, default_value_t = 45.0)]
    trap_az_max: f64,

    /// Skeet crossing-point height (m)
    #[arg(long, default_value_t = 4.6)]
    skeet_cross_height: f64,

    /// Skeet target carry distance (m)
    #[arg(long, default_value_t = 68.0)]
    skeet_carry: f64,
}

impl SceneArgs {
    fn to_config(&self) -> Result<SceneConfig, Box<dyn Error>> {
        let mut cfg = SceneConfig {
            discipline: match self.discipline {
                CliDiscipline::Trap => Discipline::Trap,
                CliDiscipline::Skeet => Discipline::Skeet,
            },
            profile: match self.profile {
                CliProfile::SettingTable => SceneProfile::SettingTable,
                CliProfile::Envelope => SceneProfile::Envelope,
            },
            gun_height: self.gun_height,
            samples_per_source: self.samples_per_source,
            step_m: self.step,
            corners_only: self.corners_only,
            seed: self.scene_seed,
            ..SceneConfig::default()
        };
        cfg.sector.az_half_deg = self.az_half;
        cfg.sector.el_min_deg = self.el_min;
        cfg.sector.el_max_deg = self.el_max;
        cfg.trap.table = self.table.parse()?;
        cfg.trap.carry = self.trap_carry;
        cfg.trap.h10_min = self.trap_h10_min;
        cfg.trap.h10_max = self.trap_h10_max;
        cfg.trap.az_max_deg = self.trap_az_max;
        cfg.skeet.cross_height = self.skeet_cross_height;
        cfg.skeet.carry = self.skeet_carry;
        Ok(cfg)
    }
}

#[derive(Args)]
struct CoupleArgs {
    /// Restrict to one station id
    #[arg(long)]
    station: Option<u32>,

    /// Restrict to one target group (trap: 1..5, skeet: H/L)
    #[arg(long)]
    group: Option<String>,

    /// Restrict to one source machine (trap: 1..15, skeet: H/L)
    #[arg(long)]
    source: Option<String>,

    /// Shooting window start (s)
    #[arg(long, default_value_t = 0.20)]
    t0: f64,

    /// Shooting window end (s)
    #[arg(long, default_value_t = 2.20)]
    t1: f64,

    /// Shooting window step (s)
    #[arg(long, default_value_t = 0.05)]
    dt: f64,

    /// Manual time points ("0.3, 0.5 0.8"); replaces the window
    #[arg(long)]
    times: Option<String>,

    /// Refine control shots at a finer time step
    #[arg(long)]
    adaptive: bool,

    /// Refinement band half-width (s)
    #[arg(long, default_value_t = 0.20)]
    band: f64,

    /// Refinement step (s)
    #[arg(long, default_value_t = 0.01)]
    dt_fine: f64,

    /// Mean muzzle speed (m/s)
    #[arg(short = 'v', long, default_value_t = 370.0)]
    v0: f64,

    /// Muzzle speed standard deviation (m/s)
    #[arg(long, default_value_t = 6.0)]
    v0_sigma: f64,

    /// Azimuth dispersion, 1 sigma (deg)
    #[arg(long, default_value_t = 1.2)]
    spread_az_sigma: f64,

    /// Elevation dispersion, 1 sigma (deg)
    #[arg(long, default_value_t = 1.2)]
    spread_el_sigma: f64,

    /// Pellet diameter (mm)
    #[arg(long, default_value_t = 2.40)]
    pellet_diameter: f64,

    /// Pellet material density (kg/m³)
    #[arg(long, default_value_t = 11340.0)]
    pellet_density: f64,

    /// Air density (kg/m³)
    #[arg(long, default_value_t = 1.225)]
    air_density: f64,

    /// Pellet drag coefficient
    #[arg(long, default_value_t = 0.47)]
    drag_cd: f64,

    /// Wind speed (m/s)
    #[arg(long, default_value_t = 0.0)]
    wind_speed: f64,

    /// Wind blow-to bearing (deg, 0 = +Y, 90 = +X)
    #[arg(long, default_value_t = 90.0)]
    wind_bearing: f64,

    /// Integration step (s)
    #[arg(long, default_value_t = 0.01)]
    ball_dt: f64,

    /// Integration time cap (s)
    #[arg(long, default_value_t = 8.0)]
    max_time: f64,

    /// Horizontal travel cap (m)
    #[arg(long, default_value_t = 350.0)]
    max_distance: f64,

    /// Monte Carlo samples per station
    #[arg(short = 'n', long, default_value_t = 3000)]
    samples: usize,

    /// Monte Carlo seed
    #[arg(long, default_value_t = 12345)]
    seed: u32,

    /// Clamp aims and samples into the station sector
    #[arg(long)]
    clip_sector: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Report progress on stderr
    #[arg(long)]
    progress: bool,
}

impl CoupleArgs {
    fn to_config(&self) -> CouplingConfig {
        CouplingConfig {
            station: match self.station {
                Some(id) => StationSelect::One(id),
                None => StationSelect::All,
            },
            time: match &self.times {
                Some(text) => TimeSampling::Manual {
                    times: parse_time_list(text),
                },
                None => TimeSampling::Window {
                    t0: self.t0,
                    t1: self.t1,
                    dt: self.dt,
                },
            },
            adaptive: self.adaptive,
            refine_band: self.band,
            refine_dt: self.dt_fine,
            v0_mean: self.v0,
            v0_sigma: self.v0_sigma,
            spread_az_sigma_deg: self.spread_az_sigma,
            spread_el_sigma_deg: self.spread_el_sigma,
            pellet_diameter_mm: self.pellet_diameter,
            pellet_density: self.pellet_density,
            air_density: self.air_density,
            drag_cd: self.drag_cd,
            wind_speed: self.wind_speed,
            wind_bearing_deg: self.wind_bearing,
            integration_dt: self.ball_dt,
            max_flight_time: self.max_time,
            max_distance: self.max_distance,
            n_samples: self.samples,
            seed: self.seed,
            clip_sector: self.clip_sector,
        }
    }

    fn to_filter(&self) -> TrajectoryFilter {
        let mut filter = TrajectoryFilter::all();
        if let Some(group) = &self.group {
            filter.active_groups = Some(std::iter::once(group.clone()).collect());
        }
        if let Some(source) = &self.source {
            filter.active_sources = Some(std::iter::once(source.clone()).collect());
        }
        filter
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Scene { scene } => {
            let scene = build_scene(&scene.to_config()?);
            println!("{}", serde_json::to_string_pretty(&scene)?);
        }
        Commands::Couple { scene, couple } => {
            let scene = build_scene(&scene.to_config()?);
            let cfg = couple.to_config();
            let filter = couple.to_filter();

            let progress_cb = |fraction: Option<f64>, label: &str| match fraction {
                Some(p) => eprintln!("[{:5.1}%] {label}", p * 100.0),
                None => eprintln!("[  ...] {label}"),
            };

            let progress_ref: clayrange::ProgressFn = &progress_cb;
            let session = CouplingSession::new();
            let result = session.compute_cached(
                &scene,
                &cfg,
                &filter,
                couple.progress.then_some(progress_ref),
            )?;

            match couple.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*result)?),
                OutputFormat::Table => print_summary(&result),
            }
            if !result.ok {
                return Err(format!(
                    "coupling infeasible: {}",
                    result
                        .reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                )
                .into());
            }
        }
    }
    Ok(())
}

fn print_summary(result: &clayrange::CouplingResult) {
    println!("COUPLING RESULT");
    println!("  stations:      {}", result.station_count);
    println!("  trajectories:  {}", result.traj_count);
    println!("  samples:       {}", result.sample_count);
    println!("  exported:      {}", result.impacts.len());
    println!("  hull vertices: {}", result.hull.len());
    println!("  hull area:     {:.1} m²", result.hull_area);
    if let Some(bb) = &result.bbox {
        let e = bb.extent();
        println!("  bbox:          {:.1} × {:.1} × {:.1} m", e[0], e[1], e[2]);
    }

    if !result.controls.is_empty() {
        println!();
        println!(
            "  {:<14} {:>4} {:>18} {:>7} {:>9} {:>9}",
            "control", "stn", "trajectory", "t (s)", "range (m)", "az (deg)"
        );
        for c in &result.controls {
            println!(
                "  {:<14} {:>4} {:>18} {:>7.3} {:>9.1} {:>9.2}",
                c.kind.as_str(),
                c.station_id,
                c.traj_id,
                c.t,
                c.range,
                c.aim_az_deg
            );
        }
    }

    let manual_shots = result
        .critical
        .iter()
        .filter(|c| c.kind == ShotKind::Manual)
        .count();
    if manual_shots > 0 {
        println!();
        println!("  manual shots visualized: {manual_shots}");
    }
}
