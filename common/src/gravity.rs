//! Gravity fields with runtime-changeable direction
//!
//! Gravity is described by a mode plus up to two anchor vectors and an
//! optional reference object. Reference objects are resolved through
//! [`GravitySampler`] on every query, so moving attractors are followed
//! without the field holding onto host state; when a source vanishes the
//! last sampled anchors keep being used.

use crate::util::Dir;
use serde::{Deserialize, Serialize};
use tracing::trace;
use vek::*;

/// Handle to a host object gravity can reference (an attractor, spline or
/// collider)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GravitySourceId(pub u64);

/// Host-side resolution of gravity source handles
pub trait GravitySampler {
    fn location(&self, source: GravitySourceId) -> Option<Vec3<f32>>;

    fn bounds(&self, source: GravitySourceId) -> Option<Aabb<f32>>;

    fn closest_spline_point(&self, source: GravitySourceId, query: Vec3<f32>) -> Option<Vec3<f32>>;

    /// Spline tangent at the point closest to `query`
    fn spline_tangent(&self, source: GravitySourceId, query: Vec3<f32>) -> Option<Dir>;

    /// Spline up vector at the point closest to `query`
    fn spline_up(&self, source: GravitySourceId, query: Vec3<f32>) -> Option<Dir>;

    /// Closest point on the source's collision surface
    fn closest_surface_point(&self, source: GravitySourceId, query: Vec3<f32>)
    -> Option<Vec3<f32>>;
}

/// Sampler for worlds without gravity source objects
impl GravitySampler for () {
    fn location(&self, _: GravitySourceId) -> Option<Vec3<f32>> { None }

    fn bounds(&self, _: GravitySourceId) -> Option<Aabb<f32>> { None }

    fn closest_spline_point(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Vec3<f32>> { None }

    fn spline_tangent(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Dir> { None }

    fn spline_up(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Dir> { None }

    fn closest_surface_point(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Vec3<f32>> { None }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GravityMode {
    /// Constant direction stored in `vec_a`
    #[default]
    Fixed,
    /// Along the tangent of a spline source at the closest point
    SplineTangent,
    /// Toward a point, `vec_a` or the source location
    Point,
    /// Toward the closest point of the infinite line through `vec_a`
    /// with direction `vec_b`
    Line,
    /// Toward the closest point of the segment `vec_a..vec_b`
    Segment,
    /// Toward the closest point of a spline source
    Spline,
    /// Against the normal `vec_b` of the plane through `vec_a`
    Plane,
    /// Against the spline up vector at the closest spline point
    SplinePlane,
    /// Toward the surface of the axis-aligned box `vec_a..vec_b` or the
    /// source bounds
    Box,
    /// Toward the closest point on the source's collision surface
    Collision,
}

/// Replicated description of a gravity field
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GravityConfig {
    pub mode: GravityMode,
    /// Multiplier on the world gravity magnitude; negative values invert
    /// the field, zero disables it
    pub scale: f32,
    pub vec_a: Vec3<f32>,
    pub vec_b: Vec3<f32>,
    pub source: Option<GravitySourceId>,
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self {
            mode: GravityMode::Fixed,
            scale: 1.0,
            vec_a: -Vec3::unit_z(),
            vec_b: Vec3::zero(),
            source: None,
        }
    }
}

/// Evaluates the gravity field and tracks changes for replication
#[derive(Clone, Debug, PartialEq)]
pub struct GravityProvider {
    config: GravityConfig,
    /// Unscaled field strength, positive
    world_magnitude: f32,
    dirty: bool,
}

impl GravityProvider {
    pub fn new(world_magnitude: f32) -> Self {
        Self {
            config: GravityConfig::default(),
            world_magnitude,
            dirty: false,
        }
    }

    pub fn config(&self) -> &GravityConfig { &self.config }

    pub fn mode(&self) -> GravityMode { self.config.mode }

    pub fn scale(&self) -> f32 { self.config.scale }

    /// Field strength after scaling, always non-negative
    pub fn magnitude(&self) -> f32 { self.world_magnitude * self.config.scale.abs() }

    /// Gravity acceleration at `pos`, zero when the field is degenerate
    /// there or disabled
    pub fn gravity(&mut self, pos: Vec3<f32>, sampler: &impl GravitySampler) -> Vec3<f32> {
        if self.config.scale == 0.0 {
            return Vec3::zero();
        }
        let magnitude = self.magnitude();
        self.direction(pos, sampler)
            .map_or(Vec3::zero(), |dir| *dir * magnitude)
    }

    /// Direction of the field at `pos`; `None` where it is undefined,
    /// like exactly at a point attractor
    pub fn direction(&mut self, pos: Vec3<f32>, sampler: &impl GravitySampler) -> Option<Dir> {
        let raw = self.raw_direction(pos, sampler)?;
        Some(if self.config.scale < 0.0 { -raw } else { raw })
    }

    /// Like [`direction`](Self::direction) but never degenerate: falls
    /// back to world down, inverted for negative scales
    pub fn direction_or_down(&mut self, pos: Vec3<f32>, sampler: &impl GravitySampler) -> Dir {
        self.direction(pos, sampler).unwrap_or_else(|| {
            if self.config.scale < 0.0 {
                Dir::up()
            } else {
                Dir::down()
            }
        })
    }

    fn raw_direction(&mut self, pos: Vec3<f32>, sampler: &impl GravitySampler) -> Option<Dir> {
        let config = &mut self.config;
        match config.mode {
            GravityMode::Fixed => Dir::from_unnormalized(config.vec_a),
            GravityMode::SplineTangent => {
                if let Some(source) = config.source {
                    if let Some(tangent) = sampler.spline_tangent(source, pos) {
                        config.vec_a = *tangent;
                    }
                }
                Dir::from_unnormalized(config.vec_a)
            },
            GravityMode::Point => {
                if let Some(source) = config.source {
                    if let Some(point) = sampler.location(source) {
                        config.vec_a = point;
                    }
                }
                Dir::from_unnormalized(config.vec_a - pos)
            },
            GravityMode::Line => {
                if let Some(source) = config.source {
                    if let Some(point) = sampler.location(source) {
                        config.vec_a = point;
                    }
                }
                let axis = config.vec_b.try_normalized()?;
                let closest = config.vec_a + axis * (pos - config.vec_a).dot(axis);
                Dir::from_unnormalized(closest - pos)
            },
            GravityMode::Segment => {
                let seg = config.vec_b - config.vec_a;
                let len_sq = seg.magnitude_squared();
                let closest = if len_sq <= f32::EPSILON {
                    config.vec_a
                } else {
                    let t = ((pos - config.vec_a).dot(seg) / len_sq).clamp(0.0, 1.0);
                    config.vec_a + seg * t
                };
                Dir::from_unnormalized(closest - pos)
            },
            GravityMode::Spline => {
                if let Some(source) = config.source {
                    if let Some(point) = sampler.closest_spline_point(source, pos) {
                        config.vec_a = point;
                    }
                }
                Dir::from_unnormalized(config.vec_a - pos)
            },
            GravityMode::Plane => Dir::from_unnormalized(-config.vec_b),
            GravityMode::SplinePlane => {
                if let Some(source) = config.source {
                    if let Some(point) = sampler.closest_spline_point(source, pos) {
                        config.vec_a = point;
                    }
                    if let Some(up) = sampler.spline_up(source, pos) {
                        config.vec_b = *up;
                    }
                }
                Dir::from_unnormalized(-config.vec_b)
            },
            GravityMode::Box => {
                if let Some(source) = config.source {
                    if let Some(bounds) = sampler.bounds(source) {
                        config.vec_a = bounds.min;
                        config.vec_b = bounds.max;
                    }
                }
                let clamped = Vec3::new(
                    pos.x.clamp(config.vec_a.x, config.vec_b.x),
                    pos.y.clamp(config.vec_a.y, config.vec_b.y),
                    pos.z.clamp(config.vec_a.z, config.vec_b.z),
                );
                Dir::from_unnormalized(clamped - pos)
            },
            GravityMode::Collision => {
                if let Some(source) = config.source {
                    if let Some(point) = sampler.closest_surface_point(source, pos) {
                        config.vec_a = point;
                    }
                }
                Dir::from_unnormalized(config.vec_a - pos)
            },
        }
    }

    fn apply(&mut self, config: GravityConfig) {
        if self.config != config {
            trace!(?config, "Gravity field changed");
            self.config = config;
            self.dirty = true;
        }
    }

    pub fn set_config(&mut self, config: GravityConfig) { self.apply(config); }

    pub fn set_scale(&mut self, scale: f32) {
        self.apply(GravityConfig {
            scale,
            ..self.config
        });
    }

    pub fn set_fixed(&mut self, dir: Dir) {
        self.apply(GravityConfig {
            mode: GravityMode::Fixed,
            vec_a: *dir,
            vec_b: Vec3::zero(),
            source: None,
            scale: self.config.scale,
        });
    }

    pub fn set_point(&mut self, point: Vec3<f32>) {
        self.apply(GravityConfig {
            mode: GravityMode::Point,
            vec_a: point,
            vec_b: Vec3::zero(),
            source: None,
            scale: self.config.scale,
        });
    }

    pub fn set_point_source(&mut self, source: GravitySourceId) {
        self.apply(GravityConfig {
            mode: GravityMode::Point,
            source: Some(source),
            ..self.config
        });
    }

    pub fn set_line(&mut self, point: Vec3<f32>, dir: Dir) {
        self.apply(GravityConfig {
            mode: GravityMode::Line,
            vec_a: point,
            vec_b: *dir,
            source: None,
            scale: self.config.scale,
        });
    }

    pub fn set_segment(&mut self, start: Vec3<f32>, end: Vec3<f32>) {
        self.apply(GravityConfig {
            mode: GravityMode::Segment,
            vec_a: start,
            vec_b: end,
            source: None,
            scale: self.config.scale,
        });
    }

    pub fn set_spline_source(&mut self, source: GravitySourceId) {
        self.apply(GravityConfig {
            mode: GravityMode::Spline,
            source: Some(source),
            ..self.config
        });
    }

    pub fn set_spline_tangent_source(&mut self, source: GravitySourceId) {
        self.apply(GravityConfig {
            mode: GravityMode::SplineTangent,
            source: Some(source),
            ..self.config
        });
    }

    pub fn set_plane(&mut self, point: Vec3<f32>, normal: Dir) {
        self.apply(GravityConfig {
            mode: GravityMode::Plane,
            vec_a: point,
            vec_b: *normal,
            source: None,
            scale: self.config.scale,
        });
    }

    pub fn set_spline_plane_source(&mut self, source: GravitySourceId) {
        self.apply(GravityConfig {
            mode: GravityMode::SplinePlane,
            source: Some(source),
            ..self.config
        });
    }

    pub fn set_box(&mut self, bounds: Aabb<f32>) {
        self.apply(GravityConfig {
            mode: GravityMode::Box,
            vec_a: bounds.min,
            vec_b: bounds.max,
            source: None,
            scale: self.config.scale,
        });
    }

    pub fn set_box_source(&mut self, source: GravitySourceId) {
        self.apply(GravityConfig {
            mode: GravityMode::Box,
            source: Some(source),
            ..self.config
        });
    }

    pub fn set_collision_source(&mut self, source: GravitySourceId) {
        self.apply(GravityConfig {
            mode: GravityMode::Collision,
            source: Some(source),
            ..self.config
        });
    }

    /// Re-target gravity at whatever the agent is standing on
    ///
    /// Fixed fields flip to pull against the floor normal; object-bound
    /// fields re-bind to the base when the host exposes it as a source.
    pub fn align_to_base(&mut self, floor_impact_normal: Dir, base_source: Option<GravitySourceId>) {
        match self.config.mode {
            GravityMode::Fixed => self.set_fixed(-floor_impact_normal),
            GravityMode::Point | GravityMode::Box | GravityMode::Collision => {
                if let Some(source) = base_source {
                    self.apply(GravityConfig {
                        source: Some(source),
                        ..self.config
                    });
                }
            },
            _ => {},
        }
    }

    /// Drains the pending replication snapshot, at most one per change
    pub fn take_update(&mut self) -> Option<GravityConfig> {
        self.dirty.then(|| {
            self.dirty = false;
            self.config
        })
    }

    /// Overwrite from a replicated snapshot without re-flagging it dirty
    pub fn apply_replicated(&mut self, config: GravityConfig) { self.config = config; }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fixed_default_pulls_down() {
        let mut field = GravityProvider::new(980.0);
        let g = field.gravity(Vec3::zero(), &());
        assert_relative_eq!(g.z, -980.0);
        assert_relative_eq!(g.x, 0.0);
    }

    #[test]
    fn zero_scale_disables_field_but_direction_survives() {
        let mut field = GravityProvider::new(980.0);
        field.set_scale(0.0);
        assert_eq!(field.gravity(Vec3::zero(), &()), Vec3::zero());
        assert_relative_eq!(field.direction_or_down(Vec3::zero(), &()).z, -1.0);
    }

    #[test]
    fn negative_scale_inverts() {
        let mut field = GravityProvider::new(980.0);
        field.set_scale(-0.5);
        let g = field.gravity(Vec3::zero(), &());
        assert_relative_eq!(g.z, 490.0);
        assert_relative_eq!(field.direction_or_down(Vec3::zero(), &()).z, 1.0);
    }

    #[test]
    fn point_below_origin_matches_fixed() {
        // Switching Fixed(down) to Point(origin) while directly below
        // the origin must not change the field direction
        let mut field = GravityProvider::new(980.0);
        let pos = Vec3::new(0.0, 0.0, 500.0);
        let before = field.direction_or_down(pos, &());
        field.set_point(Vec3::zero());
        let after = field.direction_or_down(pos, &());
        assert_relative_eq!(before.dot(*after), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn point_attractor_is_degenerate_at_its_center() {
        let mut field = GravityProvider::new(980.0);
        field.set_point(Vec3::zero());
        assert!(field.direction(Vec3::zero(), &()).is_none());
        assert_eq!(field.gravity(Vec3::zero(), &()), Vec3::zero());
        // The avoid-zero query still produces something
        assert!(field.direction_or_down(Vec3::zero(), &()).is_valid());
    }

    #[test]
    fn segment_clamps_to_endpoints() {
        let mut field = GravityProvider::new(980.0);
        field.set_segment(Vec3::zero(), Vec3::unit_x() * 100.0);
        let beyond = Vec3::new(200.0, 0.0, 50.0);
        let dir = field.direction(beyond, &()).unwrap();
        let expected = (Vec3::new(100.0, 0.0, 0.0) - beyond).normalized();
        assert_relative_eq!(dir.dot(expected), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn box_pulls_toward_surface() {
        let mut field = GravityProvider::new(980.0);
        field.set_box(Aabb {
            min: Vec3::broadcast(-100.0),
            max: Vec3::broadcast(100.0),
        });
        let dir = field.direction(Vec3::new(0.0, 0.0, 300.0), &()).unwrap();
        assert_relative_eq!(dir.z, -1.0, epsilon = 1e-6);
        // Inside the box the field is degenerate
        assert!(field.direction(Vec3::zero(), &()).is_none());
    }

    #[test]
    fn vanished_source_keeps_last_sample() {
        struct OneShot(std::cell::Cell<bool>);
        impl GravitySampler for OneShot {
            fn location(&self, _: GravitySourceId) -> Option<Vec3<f32>> {
                self.0.take().then_some(Vec3::new(0.0, 100.0, 0.0))
            }

            fn bounds(&self, _: GravitySourceId) -> Option<Aabb<f32>> { None }

            fn closest_spline_point(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Vec3<f32>> {
                None
            }

            fn spline_tangent(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Dir> { None }

            fn spline_up(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Dir> { None }

            fn closest_surface_point(&self, _: GravitySourceId, _: Vec3<f32>) -> Option<Vec3<f32>> {
                None
            }
        }

        let sampler = OneShot(std::cell::Cell::new(true));
        let mut field = GravityProvider::new(980.0);
        field.set_point_source(GravitySourceId(7));
        let pos = Vec3::zero();
        let live = field.direction(pos, &sampler).unwrap();
        assert_relative_eq!(live.y, 1.0, epsilon = 1e-6);
        // Source gone; the cached point keeps the field stable
        let cached = field.direction(pos, &sampler).unwrap();
        assert_relative_eq!(cached.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn replication_is_edge_triggered() {
        let mut field = GravityProvider::new(980.0);
        assert!(field.take_update().is_none());
        field.set_fixed(Dir::new(Vec3::unit_x()));
        assert!(field.take_update().is_some());
        assert!(field.take_update().is_none());
        // Setting the same value again does not re-replicate
        field.set_fixed(Dir::new(Vec3::unit_x()));
        assert!(field.take_update().is_none());
    }
}
