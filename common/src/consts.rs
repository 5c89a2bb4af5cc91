// The limits to how far an agent can be from its floor while still
// counting as grounded, and the tolerances of the sweeps that find it.
// Distances are in world units (cm), times in seconds.

/// Ticks shorter than this are ignored entirely
pub const MIN_TICK_TIME: f32 = 1e-6;

/// Grounded agents float at least this far above their floor
pub const MIN_FLOOR_DIST: f32 = 1.9;
/// Grounded agents float at most this far above their floor
pub const MAX_FLOOR_DIST: f32 = 2.4;

/// Sweep contacts closer than this to the capsule axis (minus the shrunk
/// radius) are treated as edge hits and rejected for floor purposes
pub const SWEEP_EDGE_REJECT_DISTANCE: f32 = 0.15;

/// Capsule radius shrink factor for floor sweeps
pub const FLOOR_SWEEP_SHRINK_SCALE: f32 = 0.9;
/// Harsher shrink factor used to retry floor sweeps that start in
/// penetration or reject on an edge
pub const FLOOR_SWEEP_RETRY_SHRINK_SCALE: f32 = 0.1;

/// Braking zeroes velocity once its magnitude drops below this
pub const BRAKE_TO_STOP_VELOCITY: f32 = 10.0;

/// Surfaces with an up-axis normal component below this are treated as
/// perfectly vertical walls
pub const VERTICAL_SLOPE_NORMAL: f32 = 0.001;

/// Maximum up-axis component of a hit normal that still counts as the
/// side of a step rather than its top
pub const MAX_STEP_SIDE_NORMAL: f32 = 0.08;

/// Distance kept between the capsule and a surface it was pushed out of
pub const PENETRATION_PULLBACK_DISTANCE: f32 = 0.125;
/// Inflation applied to overlap checks when resolving penetration
pub const PENETRATION_OVERLAP_INFLATION: f32 = 0.1;

/// Fluid friction is halved and further scaled by immersion depth
pub const SWIM_FRICTION_DEPTH_SCALE: f32 = 0.5;
/// Immersion depth below which upward acceleration is damped near the
/// water surface
pub const SWIM_SURFACE_DEPTH: f32 = 0.65;
/// Fraction of upward acceleration kept near the water surface
pub const SWIM_SURFACE_ACCEL_SCALE: f32 = 0.1;

pub const KINDA_SMALL_NUMBER: f32 = 1e-4;
pub const SMALL_NUMBER: f32 = 1e-8;
