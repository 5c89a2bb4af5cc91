//! Analytic collision backend built from planar surfaces
//!
//! Surfaces are half-spaces, optionally bounded to an axis-aligned region
//! to model patches like steps and ledges. Sweeps are solved in closed
//! form, which keeps the backend fully deterministic. Bounded surfaces are
//! validated against the impact point only, so shapes overhanging a patch
//! edge can miss contacts; real games are expected to bring their own
//! backend and use this one for tools and tests.

use super::{CollisionWorld, Fluid, Hit, SurfaceId, SweepShape};
use crate::util::{Dir, Plane};
use vek::*;

const BOUNDS_TOLERANCE: f32 = 1e-3;

#[derive(Clone, Debug)]
pub struct Surface {
    pub plane: Plane,
    /// Region the surface is valid in; unbounded when `None`
    pub bounds: Option<Aabb<f32>>,
    pub walkable_override: Option<f32>,
    pub step_up: bool,
    pub velocity: Vec3<f32>,
}

impl Surface {
    pub fn plane(normal: Dir, point: Vec3<f32>) -> Self {
        Self {
            plane: Plane::through(normal, point),
            bounds: None,
            walkable_override: None,
            step_up: true,
            velocity: Vec3::zero(),
        }
    }

    #[must_use]
    pub fn bounded(mut self, bounds: Aabb<f32>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    #[must_use]
    pub fn with_walkable_override(mut self, min_walkable_z: f32) -> Self {
        self.walkable_override = Some(min_walkable_z);
        self
    }

    #[must_use]
    pub fn no_step_up(mut self) -> Self {
        self.step_up = false;
        self
    }

    #[must_use]
    pub fn moving(mut self, velocity: Vec3<f32>) -> Self {
        self.velocity = velocity;
        self
    }

    fn contains_point(&self, point: Vec3<f32>) -> bool {
        match self.bounds {
            None => true,
            Some(aabb) => {
                let min = aabb.min - BOUNDS_TOLERANCE;
                let max = aabb.max + BOUNDS_TOLERANCE;
                (point.x >= min.x && point.x <= max.x)
                    && (point.y >= min.y && point.y <= max.y)
                    && (point.z >= min.z && point.z <= max.z)
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlaneWorld {
    surfaces: Vec<Surface>,
    water: Vec<(Aabb<f32>, Fluid)>,
}

impl PlaneWorld {
    pub fn new() -> Self { Self::default() }

    /// World with a single unbounded floor through the origin, normal +z
    pub fn flat_floor() -> Self {
        let mut world = Self::new();
        world.add_surface(Surface::plane(Dir::up(), Vec3::zero()));
        world
    }

    pub fn add_surface(&mut self, surface: Surface) -> SurfaceId {
        self.surfaces.push(surface);
        SurfaceId(self.surfaces.len() as u64 - 1)
    }

    pub fn add_plane(&mut self, normal: Dir, point: Vec3<f32>) -> SurfaceId {
        self.add_surface(Surface::plane(normal, point))
    }

    pub fn add_water(&mut self, volume: Aabb<f32>, fluid: Fluid) { self.water.push((volume, fluid)); }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> { self.surfaces.get(id.0 as usize) }

    /// Distance from the plane to the support point of `shape` along the
    /// plane normal, relative to the shape center
    fn support_offset(shape: SweepShape, rot: Quaternion<f32>, normal: Vec3<f32>) -> f32 {
        match shape {
            SweepShape::Capsule(capsule) => {
                let axis = rot * Vec3::unit_z();
                capsule.segment_half_len() * normal.dot(axis).abs() + capsule.radius
            },
            SweepShape::Sphere(radius) => radius,
            SweepShape::Box(half_extents) => {
                let ax = rot * Vec3::unit_x();
                let ay = rot * Vec3::unit_y();
                let az = rot * Vec3::unit_z();
                half_extents.x * normal.dot(ax).abs()
                    + half_extents.y * normal.dot(ay).abs()
                    + half_extents.z * normal.dot(az).abs()
            },
        }
    }

    /// Point of `shape` centered at `center` that is deepest along
    /// `-normal`
    fn support_point(
        shape: SweepShape,
        rot: Quaternion<f32>,
        center: Vec3<f32>,
        normal: Vec3<f32>,
    ) -> Vec3<f32> {
        match shape {
            SweepShape::Capsule(capsule) => {
                let axis = rot * Vec3::unit_z();
                let end = center - axis * capsule.segment_half_len() * normal.dot(axis).signum();
                end - normal * capsule.radius
            },
            SweepShape::Sphere(radius) => center - normal * radius,
            SweepShape::Box(half_extents) => {
                let ax = rot * Vec3::unit_x();
                let ay = rot * Vec3::unit_y();
                let az = rot * Vec3::unit_z();
                center
                    - ax * half_extents.x * normal.dot(ax).signum()
                    - ay * half_extents.y * normal.dot(ay).signum()
                    - az * half_extents.z * normal.dot(az).signum()
            },
        }
    }

    fn sweep_shape(
        &self,
        shape: SweepShape,
        rot: Quaternion<f32>,
        start: Vec3<f32>,
        end: Vec3<f32>,
        offset_of: impl Fn(&Surface) -> f32,
    ) -> Option<Hit> {
        let delta = end - start;
        let mut best: Option<Hit> = None;
        for (idx, surface) in self.surfaces.iter().enumerate() {
            let normal = *surface.plane.normal;
            let offset = offset_of(surface);
            let dist_start = surface.plane.distance(start) - offset;
            let rate = normal.dot(delta);

            let (fraction, start_penetrating) = if dist_start < 0.0 {
                (0.0, true)
            } else if rate >= -f32::EPSILON {
                // Moving away from or along the surface
                continue;
            } else {
                let t = dist_start / -rate;
                if t > 1.0 {
                    continue;
                }
                (t, false)
            };

            let location = start + delta * fraction;
            let impact_point = Self::support_point(shape, rot, location, normal);
            if !surface.contains_point(impact_point) {
                continue;
            }

            let hit = Hit {
                blocking: true,
                start_penetrating,
                fraction,
                location,
                normal: surface.plane.normal,
                impact_normal: surface.plane.normal,
                impact_point,
                penetration_depth: if start_penetrating { -dist_start } else { 0.0 },
                surface: SurfaceId(idx as u64),
            };
            let better = match &best {
                None => true,
                Some(prev) => {
                    if start_penetrating != prev.start_penetrating {
                        // Initial overlaps take priority, as a physics
                        // engine would report them first
                        start_penetrating
                    } else if start_penetrating {
                        hit.penetration_depth > prev.penetration_depth
                    } else {
                        fraction < prev.fraction
                    }
                },
            };
            if better {
                best = Some(hit);
            }
        }
        best
    }
}

impl CollisionWorld for PlaneWorld {
    fn sweep(
        &self,
        shape: SweepShape,
        rot: Quaternion<f32>,
        start: Vec3<f32>,
        end: Vec3<f32>,
    ) -> Option<Hit> {
        self.sweep_shape(shape, rot, start, end, |surface| {
            Self::support_offset(shape, rot, *surface.plane.normal)
        })
    }

    fn line_trace(&self, start: Vec3<f32>, end: Vec3<f32>) -> Option<Hit> {
        let shape = SweepShape::Sphere(0.0);
        self.sweep_shape(shape, Quaternion::identity(), start, end, |_| 0.0)
    }

    fn overlaps(&self, shape: SweepShape, rot: Quaternion<f32>, pos: Vec3<f32>) -> bool {
        self.surfaces.iter().any(|surface| {
            let offset = Self::support_offset(shape, rot, *surface.plane.normal);
            let dist = surface.plane.distance(pos) - offset;
            if dist >= 0.0 {
                return false;
            }
            let impact = Self::support_point(shape, rot, pos, *surface.plane.normal);
            surface.contains_point(impact)
        })
    }

    fn walkable_normal_override(&self, surface: SurfaceId) -> Option<f32> {
        self.surface(surface).and_then(|s| s.walkable_override)
    }

    fn can_step_up_on(&self, surface: SurfaceId) -> bool {
        self.surface(surface).is_none_or(|s| s.step_up)
    }

    fn base_velocity(&self, surface: SurfaceId) -> Vec3<f32> {
        self.surface(surface).map_or(Vec3::zero(), |s| s.velocity)
    }

    fn base_transform(&self, surface: SurfaceId) -> Option<Mat4<f32>> {
        self.surface(surface)
            .map(|s| Mat4::translation_3d(s.velocity))
    }

    fn fluid_at(&self, pos: Vec3<f32>) -> Option<Fluid> {
        self.water
            .iter()
            .find(|(volume, _)| volume.contains_point(pos))
            .map(|&(_, fluid)| fluid)
    }

    fn water_line(&self, from: Vec3<f32>, to: Vec3<f32>) -> Option<Vec3<f32>> {
        let delta = to - from;
        for &(volume, _) in &self.water {
            if !volume.contains_point(to) || volume.contains_point(from) {
                continue;
            }
            // Slab clip for the entry time
            let mut t_enter = 0.0_f32;
            let mut t_exit = 1.0_f32;
            let mut ok = true;
            for i in 0..3 {
                if delta[i].abs() < f32::EPSILON {
                    if from[i] < volume.min[i] || from[i] > volume.max[i] {
                        ok = false;
                        break;
                    }
                } else {
                    let t0 = (volume.min[i] - from[i]) / delta[i];
                    let t1 = (volume.max[i] - from[i]) / delta[i];
                    t_enter = t_enter.max(t0.min(t1));
                    t_exit = t_exit.min(t0.max(t1));
                }
            }
            if ok && t_enter <= t_exit {
                return Some(from + delta * t_enter);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Capsule;
    use approx::assert_relative_eq;

    fn capsule() -> SweepShape { SweepShape::Capsule(Capsule::new(34.0, 88.0)) }

    #[test]
    fn capsule_sweep_stops_on_floor() {
        let world = PlaneWorld::flat_floor();
        let start = Vec3::new(0.0, 0.0, 200.0);
        let end = Vec3::new(0.0, 0.0, 50.0);
        let hit = world
            .sweep(capsule(), Quaternion::identity(), start, end)
            .unwrap();
        assert!(hit.blocking && !hit.start_penetrating);
        // Contact when the capsule bottom touches z = 0
        assert_relative_eq!(hit.location.z, 88.0, epsilon = 1e-3);
        assert_relative_eq!(hit.fraction, (200.0 - 88.0) / 150.0, epsilon = 1e-4);
        assert_relative_eq!(hit.impact_point.z, 0.0, epsilon = 1e-3);
        assert_relative_eq!(hit.normal.z, 1.0);
    }

    #[test]
    fn penetrating_start_is_reported() {
        let world = PlaneWorld::flat_floor();
        let start = Vec3::new(0.0, 0.0, 50.0);
        let hit = world
            .sweep(
                capsule(),
                Quaternion::identity(),
                start,
                start + Vec3::unit_x(),
            )
            .unwrap();
        assert!(hit.start_penetrating);
        assert_relative_eq!(hit.penetration_depth, 38.0, epsilon = 1e-3);
    }

    #[test]
    fn bounded_patch_misses_outside() {
        let mut world = PlaneWorld::new();
        world.add_surface(
            Surface::plane(Dir::up(), Vec3::new(0.0, 0.0, 100.0)).bounded(Aabb {
                min: Vec3::new(-50.0, -50.0, 99.0),
                max: Vec3::new(50.0, 50.0, 101.0),
            }),
        );
        let rot = Quaternion::identity();
        let above = Vec3::new(0.0, 0.0, 300.0);
        assert!(
            world
                .sweep(capsule(), rot, above, Vec3::new(0.0, 0.0, 150.0))
                .is_some()
        );
        let outside = Vec3::new(200.0, 0.0, 300.0);
        assert!(
            world
                .sweep(capsule(), rot, outside, Vec3::new(200.0, 0.0, 150.0))
                .is_none()
        );
    }

    #[test]
    fn tilted_capsule_support_matches_axis() {
        let world = PlaneWorld::flat_floor();
        // Lying on its side the capsule only reaches down by its radius
        let rot = Quaternion::rotation_x(std::f32::consts::FRAC_PI_2);
        let hit = world
            .sweep(
                capsule(),
                rot,
                Vec3::new(0.0, 0.0, 200.0),
                Vec3::new(0.0, 0.0, 0.0),
            )
            .unwrap();
        assert_relative_eq!(hit.location.z, 34.0, epsilon = 1e-3);
    }

    #[test]
    fn line_trace_hits_plane() {
        let world = PlaneWorld::flat_floor();
        let hit = world
            .line_trace(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, -10.0))
            .unwrap();
        assert_relative_eq!(hit.fraction, 0.5, epsilon = 1e-5);
        assert_relative_eq!(hit.impact_point.z, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn water_line_finds_surface() {
        let mut world = PlaneWorld::new();
        world.add_water(
            Aabb {
                min: Vec3::new(-100.0, -100.0, -100.0),
                max: Vec3::new(100.0, 100.0, 0.0),
            },
            Fluid::default(),
        );
        let crossing = world
            .water_line(Vec3::new(0.0, 0.0, 50.0), Vec3::new(0.0, 0.0, -50.0))
            .unwrap();
        assert_relative_eq!(crossing.z, 0.0, epsilon = 1e-4);
        assert!(world.fluid_at(Vec3::new(0.0, 0.0, -10.0)).is_some());
        assert!(world.fluid_at(Vec3::new(0.0, 0.0, 10.0)).is_none());
    }
}
