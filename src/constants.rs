/// Physical constants and engine-wide numerical tolerances.

/// Gravitational acceleration in m/s²
pub const G_ACCEL_MPS2: f64 = 9.80665;

/// Standard sea-level air density (kg/m³)
pub const STANDARD_AIR_DENSITY: f64 = 1.225;

/// Drag coefficient of a smooth sphere in the relevant Reynolds regime
pub const SPHERE_CD: f64 = 0.47;

/// Lead density (kg/m³), the default pellet material
pub const LEAD_DENSITY: f64 = 11340.0;

/// Default pellet diameter in millimetres (No. 7.5 shot)
pub const DEFAULT_PELLET_DIAMETER_MM: f64 = 2.40;

/// Residual pellet speed below which further travel is negligible (m/s)
pub const LOW_SPEED_FLOOR_MPS: f64 = 8.0;

/// Hard cap on horizontal pellet travel used by the integrator (m)
pub const DEFAULT_MAX_DISTANCE_M: f64 = 350.0;

/// Visualization length of shooting-cone boundary rays (m)
pub const CONE_RAY_LENGTH_M: f64 = 60.0;

/// Maximum number of impact points exported in a result
pub const MAX_EXPORTED_IMPACTS: usize = 5000;

/// Maximum number of visualized shots in manual time mode
pub const MAX_MANUAL_SHOTS: usize = 240;

/// General numerical tolerance for floating point comparisons
pub const NUMERICAL_TOLERANCE: f64 = 1e-9;

/// Guard added to denominators before division
pub const MIN_DIVISION_THRESHOLD: f64 = 1e-12;

/// Smallest accepted coarse time-sampling step (s)
pub const MIN_WINDOW_DT: f64 = 0.005;

/// Smallest accepted refinement step (s)
pub const MIN_FINE_DT: f64 = 0.002;

/// Smallest accepted refinement band half-width (s)
pub const MIN_REFINE_BAND: f64 = 0.05;
