pub mod plane;

pub use plane::PlaneWorld;

use crate::util::Dir;
use serde::{Deserialize, Serialize};
use vek::*;

/// Rotation placing a shape's local z axis along `up`; capsules and floor
/// boxes are symmetric around it, so this is all their sweeps need
pub fn capsule_rot(up: Dir) -> Quaternion<f32> {
    Quaternion::rotation_from_to_3d(Vec3::unit_z(), *up)
}

/// Stable identifier of a piece of collision geometry owned by the backend
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

/// Vertical capsule used for agent collision
///
/// `half_height` spans from the center to the tip of a hemisphere, so it is
/// never less than `radius`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub radius: f32,
    pub half_height: f32,
}

impl Capsule {
    pub fn new(radius: f32, half_height: f32) -> Self {
        debug_assert!(radius > 0.0 && half_height >= radius);
        Self {
            radius,
            half_height,
        }
    }

    /// Half the length of the inner segment between the hemisphere centers
    pub fn segment_half_len(&self) -> f32 { (self.half_height - self.radius).max(0.0) }

    /// Center of the bottom hemisphere, given the capsule center and up axis
    pub fn bottom_sphere_center(&self, center: Vec3<f32>, up: Dir) -> Vec3<f32> {
        center - *up * self.segment_half_len()
    }

    /// Lowest point of the capsule along the up axis
    pub fn bottom_point(&self, center: Vec3<f32>, up: Dir) -> Vec3<f32> {
        center - *up * self.half_height
    }

    #[must_use]
    pub fn shrunk(&self, radius_scale: f32, height_shrink: f32) -> Self {
        let radius = (self.radius * radius_scale).max(0.1);
        Self {
            radius,
            half_height: (self.half_height - height_shrink).max(radius),
        }
    }
}

/// Shape that can be swept or overlap-tested through a [`CollisionWorld`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SweepShape {
    Capsule(Capsule),
    Sphere(f32),
    /// Oriented box given by its half extents
    Box(Vec3<f32>),
}

/// Result of a sweep or trace against backend geometry
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    /// False for overlap-only contacts the mover may pass through
    pub blocking: bool,
    /// The shape was already intersecting geometry at the start of the
    /// sweep; `fraction` is zero and `penetration_depth` is set
    pub start_penetrating: bool,
    /// Portion of the sweep completed before contact, in `0.0..=1.0`
    pub fraction: f32,
    /// Shape center at the time of contact
    pub location: Vec3<f32>,
    /// Normal the shape can be pushed along to separate
    pub normal: Dir,
    /// Geometric normal of the surface that was struck
    pub impact_normal: Dir,
    pub impact_point: Vec3<f32>,
    pub penetration_depth: f32,
    pub surface: SurfaceId,
}

impl Hit {
    /// Portion of `delta` that was actually covered
    pub fn covered(&self, delta: Vec3<f32>) -> Vec3<f32> { delta * self.fraction }
}

/// Fluid properties of a volume an agent can swim through
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fluid {
    pub friction: f32,
    /// Speed clamp applied while falling through this volume
    pub terminal_velocity: f32,
}

impl Default for Fluid {
    fn default() -> Self {
        Self {
            friction: 0.3,
            terminal_velocity: 4000.0,
        }
    }
}

/// Collision queries the simulation needs from its host
///
/// The simulation owns no geometry. Backends answer sweeps, traces and
/// overlap tests; per-surface hooks let them override walkability, forbid
/// stepping and report the motion of movable bases.
pub trait CollisionWorld {
    /// Earliest blocking contact of `shape` swept from `start` to `end`,
    /// or `None` for a clean move
    fn sweep(
        &self,
        shape: SweepShape,
        rot: Quaternion<f32>,
        start: Vec3<f32>,
        end: Vec3<f32>,
    ) -> Option<Hit>;

    /// Zero-width ray query
    fn line_trace(&self, start: Vec3<f32>, end: Vec3<f32>) -> Option<Hit>;

    /// Whether `shape` placed at `pos` intersects any blocking geometry
    fn overlaps(&self, shape: SweepShape, rot: Quaternion<f32>, pos: Vec3<f32>) -> bool;

    /// Per-surface replacement for the configured walkable slope limit
    fn walkable_normal_override(&self, surface: SurfaceId) -> Option<f32> {
        let _ = surface;
        None
    }

    /// Whether agents may step up onto this surface
    fn can_step_up_on(&self, surface: SurfaceId) -> bool {
        let _ = surface;
        true
    }

    /// Velocity of a movable base, zero for static geometry
    fn base_velocity(&self, surface: SurfaceId) -> Vec3<f32> {
        let _ = surface;
        Vec3::zero()
    }

    /// World transform of a movable base, `None` when the base no longer
    /// exists
    fn base_transform(&self, surface: SurfaceId) -> Option<Mat4<f32>> {
        let _ = surface;
        None
    }

    /// Gravity source handle attached to a surface, letting gravity
    /// re-target whatever the agent stands on
    fn gravity_source_of(&self, surface: SurfaceId) -> Option<crate::gravity::GravitySourceId> {
        let _ = surface;
        None
    }

    /// Fluid volume containing `pos`, if any
    fn fluid_at(&self, pos: Vec3<f32>) -> Option<Fluid> {
        let _ = pos;
        None
    }

    /// Point where the segment from `from` (outside water) to `to` (inside
    /// water) crosses the fluid surface
    fn water_line(&self, from: Vec3<f32>, to: Vec3<f32>) -> Option<Vec3<f32>> {
        let _ = (from, to);
        None
    }
}
