//! Floor detection relative to an arbitrary up axis
//!
//! The scanner finds the surface supporting a capsule by sweeping a
//! slightly shrunk copy of it downward, retrying with a much thinner
//! capsule when the first sweep starts in penetration or catches a ledge
//! edge, and falling back to a line trace when the sweeps are unusable.

use crate::{
    config::MoveConfig,
    consts::{
        FLOOR_SWEEP_RETRY_SHRINK_SCALE, FLOOR_SWEEP_SHRINK_SCALE, KINDA_SMALL_NUMBER,
        MAX_FLOOR_DIST, MIN_FLOOR_DIST, SWEEP_EDGE_REJECT_DISTANCE,
    },
    util::Dir,
    world::{capsule_rot, Capsule, CollisionWorld, Hit, SweepShape},
};
use std::f32::consts::FRAC_PI_4;
use tracing::debug;
use vek::*;

/// What supports a capsule, if anything
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FloorResult {
    pub blocking_hit: bool,
    pub walkable: bool,
    /// The result came from the line-trace fallback
    pub line_trace: bool,
    /// Distance from the capsule bottom to the swept floor
    pub floor_dist: f32,
    /// Distance from the capsule bottom to the line-traced floor
    pub line_dist: f32,
    pub hit: Option<Hit>,
}

impl FloorResult {
    pub fn clear(&mut self) { *self = Self::default(); }

    pub fn is_walkable_floor(&self) -> bool { self.blocking_hit && self.walkable }

    pub fn distance_to_floor(&self) -> f32 {
        // Favor the line trace distance when its result was used
        if self.line_trace {
            self.line_dist
        } else {
            self.floor_dist
        }
    }

    pub fn set_from_sweep(&mut self, hit: Hit, sweep_floor_dist: f32, walkable: bool) {
        *self = Self {
            blocking_hit: hit.blocking && !hit.start_penetrating,
            walkable,
            line_trace: false,
            floor_dist: sweep_floor_dist,
            line_dist: sweep_floor_dist,
            hit: Some(hit),
        };
    }

    pub fn set_from_line_trace(
        &mut self,
        hit: Hit,
        sweep_floor_dist: f32,
        line_dist: f32,
        walkable: bool,
    ) {
        // Keep the sweep hit but overwrite the surface info with the more
        // accurate line result
        if let Some(old) = self.hit.as_mut().filter(|old| old.blocking && hit.blocking) {
            let fraction = old.fraction;
            let location = old.location;
            *old = hit;
            old.fraction = fraction;
            old.location = location;
            self.blocking_hit = true;
            self.floor_dist = sweep_floor_dist;
            self.line_dist = line_dist;
            self.line_trace = true;
            self.walkable = walkable;
        }
    }
}

/// Floor queries against a collision backend
pub struct FloorScanner<'a, W> {
    pub world: &'a W,
    pub config: &'a MoveConfig,
}

impl<W: CollisionWorld> FloorScanner<'_, W> {
    /// Whether the struck surface can support walking, given the capsule
    /// up axis and (while falling) the gravity direction
    pub fn is_walkable(&self, hit: &Hit, up: Dir, gravity_dir: Dir, falling: bool) -> bool {
        if !hit.blocking {
            return false;
        }
        let normal_up = hit.impact_normal.dot(*up);
        // Never walk up vertical surfaces
        if normal_up < KINDA_SMALL_NUMBER {
            return false;
        }
        let walkable_z = self
            .world
            .walkable_normal_override(hit.surface)
            .unwrap_or(self.config.walkable_floor_z);
        if normal_up < walkable_z {
            return false;
        }
        // While falling the surface must also oppose gravity steeply
        // enough, or the agent would land on slopes it cannot stand on
        if falling
            && !self.config.land_on_any_surface
            && hit.impact_normal.dot(-*gravity_dir) < walkable_z
        {
            return false;
        }
        true
    }

    /// Whether `impact` is close enough to the capsule axis for floor
    /// sweeps to trust it
    pub fn is_within_edge_tolerance(
        &self,
        capsule_location: Vec3<f32>,
        up: Dir,
        impact: Vec3<f32>,
        capsule_radius: f32,
    ) -> bool {
        let delta = impact - capsule_location;
        let lateral = delta - *up * delta.dot(*up);
        let reduced_radius = (capsule_radius - SWEEP_EDGE_REJECT_DISTANCE)
            .max(SWEEP_EDGE_REJECT_DISTANCE + KINDA_SMALL_NUMBER);
        lateral.magnitude_squared() < reduced_radius * reduced_radius
    }

    /// Downward shape sweep used for floor queries
    ///
    /// With flat-base checks enabled the capsule is replaced by an
    /// enclosed box swept twice, first rotated a quarter turn around the
    /// axis, so the agent does not slide off edges its round base
    /// overhangs.
    fn floor_sweep_test(
        &self,
        capsule: Capsule,
        up: Dir,
        start: Vec3<f32>,
        end: Vec3<f32>,
    ) -> Option<Hit> {
        let rot = capsule_rot(up);
        if !self.config.use_flat_base_for_floor_checks {
            self.world
                .sweep(SweepShape::Capsule(capsule), rot, start, end)
        } else {
            let half_extents = Vec3::new(
                capsule.radius * 0.707,
                capsule.radius * 0.707,
                capsule.half_height,
            );
            let shape = SweepShape::Box(half_extents);
            let rotated = rot * Quaternion::rotation_z(FRAC_PI_4);
            self.world
                .sweep(shape, rotated, start, end)
                .filter(|hit| hit.blocking)
                .or_else(|| self.world.sweep(shape, rot, start, end))
        }
    }

    /// Distance from the capsule at `pos` to the floor below it
    ///
    /// `prior` may carry the hit of an earlier downward capsule sweep
    /// (for instance the one that just moved the agent) to avoid
    /// repeating it.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_floor_dist(
        &self,
        pos: Vec3<f32>,
        up: Dir,
        gravity_dir: Dir,
        falling: bool,
        capsule: Capsule,
        line_distance: f32,
        sweep_distance: f32,
        sweep_radius: f32,
        prior: Option<&Hit>,
    ) -> FloorResult {
        let mut result = FloorResult::default();
        if sweep_distance < line_distance {
            debug_assert!(
                sweep_distance >= line_distance,
                "floor sweeps must reach at least as far as the line trace"
            );
            return result;
        }
        let half_height = capsule.half_height;
        let radius = capsule.radius;

        // Reuse the prior downward sweep when it already struck a usable
        // floor close to the capsule axis
        if let Some(hit) = prior.filter(|hit| hit.blocking && !hit.start_penetrating) {
            let floor_dist = (pos - hit.location).dot(*up);
            if floor_dist >= 0.0
                && self.is_within_edge_tolerance(pos, up, hit.impact_point, radius)
                && self.is_walkable(hit, up, gravity_dir, falling)
            {
                result.set_from_sweep(*hit, floor_dist, true);
                return result;
            }
        }

        let mut blocking_found = false;
        if sweep_distance > 0.0 && sweep_radius > 0.0 {
            // Sweep a shrunk capsule so contacts at the very bottom of
            // the real capsule register as hits rather than overlaps
            let shrink_base = capsule.segment_half_len();
            let mut shrink_height = shrink_base * (1.0 - FLOOR_SWEEP_SHRINK_SCALE);
            let mut trace_dist = sweep_distance + shrink_height;
            let mut shape = Capsule {
                radius: sweep_radius,
                half_height: (half_height - shrink_height).max(sweep_radius),
            };
            let mut hit = self.floor_sweep_test(shape, up, pos, pos - *up * trace_dist);

            if let Some(h) = &hit {
                if h.start_penetrating
                    || !self.is_within_edge_tolerance(pos, up, h.impact_point, shape.radius)
                {
                    // A thinner capsule avoids the adjacent geometry or
                    // edge the first sweep caught on
                    let retry_radius =
                        (shape.radius - SWEEP_EDGE_REJECT_DISTANCE - KINDA_SMALL_NUMBER).max(0.0);
                    if retry_radius > KINDA_SMALL_NUMBER {
                        shrink_height = shrink_base * (1.0 - FLOOR_SWEEP_RETRY_SHRINK_SCALE);
                        trace_dist = sweep_distance + shrink_height;
                        shape = Capsule {
                            radius: retry_radius,
                            half_height: (half_height - shrink_height).max(retry_radius),
                        };
                        hit = self.floor_sweep_test(shape, up, pos, pos - *up * trace_dist);
                    }
                }
            }

            if let Some(h) = hit.filter(|h| h.blocking && !h.start_penetrating) {
                // Allow a little penetration to keep the sim stable when
                // the floor pushed slightly into the capsule
                let max_penetration_adjust = MAX_FLOOR_DIST.max(radius);
                let sweep_result =
                    (h.fraction * trace_dist - shrink_height).max(-max_penetration_adjust);
                result.set_from_sweep(h, sweep_result, false);
                blocking_found = true;
                if sweep_result <= sweep_distance && self.is_walkable(&h, up, gravity_dir, falling)
                {
                    result.walkable = true;
                    return result;
                }
            }
        }

        // A longer sweep than line trace is required, so a missed sweep
        // means the line trace cannot find anything usable either
        if !blocking_found && !result.walkable {
            result.floor_dist = sweep_distance;
            return result;
        }

        if line_distance > 0.0 {
            let shrink_height = half_height;
            let trace_dist = line_distance + shrink_height;
            let hit = self.world.line_trace(pos, pos - *up * trace_dist);
            if let Some(h) = hit.filter(|h| h.blocking && h.fraction > 0.0) {
                let max_penetration_adjust = MAX_FLOOR_DIST.max(radius);
                let line_result =
                    (h.fraction * trace_dist - shrink_height).max(-max_penetration_adjust);
                result.blocking_hit = true;
                if line_result <= line_distance && self.is_walkable(&h, up, gravity_dir, falling) {
                    let sweep_floor_dist = result.floor_dist;
                    result.set_from_line_trace(h, sweep_floor_dist, line_result, true);
                    return result;
                }
            }
        }

        result.walkable = false;
        result
    }

    /// Full floor query under the capsule at `pos`
    pub fn find_floor(
        &self,
        pos: Vec3<f32>,
        up: Dir,
        gravity_dir: Dir,
        falling: bool,
        capsule: Capsule,
        prior: Option<&Hit>,
    ) -> FloorResult {
        // Grounded agents may reach further down so ramps and stairs
        // don't briefly drop them into falling
        let height_check_adjust = if !falling {
            MAX_FLOOR_DIST + KINDA_SMALL_NUMBER
        } else {
            -MAX_FLOOR_DIST
        };
        let trace_dist = MAX_FLOOR_DIST.max(self.config.max_step_height + height_check_adjust);

        let mut result = self.compute_floor_dist(
            pos,
            up,
            gravity_dir,
            falling,
            capsule,
            trace_dist,
            trace_dist,
            capsule.radius,
            prior,
        );

        if result.blocking_hit && !result.line_trace {
            if let Some(hit) = result.hit {
                if self.should_compute_perch_result(&hit, up, capsule, true) {
                    let mut max_perch_floor_dist =
                        MAX_FLOOR_DIST.max(self.config.max_step_height + height_check_adjust);
                    if !falling {
                        max_perch_floor_dist += self.config.perch_additional_height.max(0.0);
                    }
                    match self.compute_perch_result(
                        self.config.valid_perch_radius(capsule.radius),
                        &hit,
                        up,
                        gravity_dir,
                        falling,
                        capsule,
                        max_perch_floor_dist,
                    ) {
                        Some(perch) => {
                            // Don't let the floor adjustment push the
                            // capsule past the perch distance, or it
                            // would fall next tick
                            let avg_floor_dist = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;
                            let move_up_dist = avg_floor_dist - result.floor_dist;
                            if move_up_dist + perch.floor_dist >= max_perch_floor_dist {
                                result.floor_dist = avg_floor_dist;
                            }
                            if !perch.walkable {
                                if let Some(perch_hit) = perch.hit {
                                    let sweep_floor_dist = result.floor_dist;
                                    result.set_from_line_trace(
                                        perch_hit,
                                        sweep_floor_dist,
                                        perch.floor_dist,
                                        false,
                                    );
                                }
                            }
                        },
                        None => {
                            debug!("Unable to perch on ledge, invalidating floor");
                            result.walkable = false;
                        },
                    }
                }
            }
        }
        result
    }

    /// Whether a hit near the capsule edge needs a perch test to decide
    /// if the agent can keep standing there
    pub fn should_compute_perch_result(
        &self,
        hit: &Hit,
        up: Dir,
        capsule: Capsule,
        check_radius: bool,
    ) -> bool {
        if !hit.blocking || hit.start_penetrating {
            return false;
        }
        if self.config.perch_radius_threshold() <= SWEEP_EDGE_REJECT_DISTANCE {
            return false;
        }
        if check_radius {
            let delta = hit.impact_point - hit.location;
            let lateral = delta - *up * delta.dot(*up);
            let stand_on_edge_radius = self.config.valid_perch_radius(capsule.radius);
            if lateral.magnitude_squared() <= stand_on_edge_radius * stand_on_edge_radius {
                // Already within perch radius
                return false;
            }
        }
        true
    }

    /// Floor test under the impact point of an edge hit, with a reduced
    /// radius, to see whether the agent may balance there
    #[allow(clippy::too_many_arguments)]
    pub fn compute_perch_result(
        &self,
        test_radius: f32,
        hit: &Hit,
        up: Dir,
        gravity_dir: Dir,
        falling: bool,
        capsule: Capsule,
        max_floor_dist: f32,
    ) -> Option<FloorResult> {
        if max_floor_dist <= 0.0 {
            return None;
        }
        // Sweep from the capsule height but laterally over the impact
        let capsule_location = hit.location;
        let delta = hit.impact_point - capsule_location;
        let perch_center = capsule_location + (delta - *up * delta.dot(*up));

        let bottom = capsule.bottom_point(capsule_location, up);
        let hit_above_base = (hit.impact_point - bottom).dot(*up).max(0.0);
        let perch_line_dist = (max_floor_dist - hit_above_base).max(0.0);
        let perch_sweep_dist = max_floor_dist.max(0.0);
        let actual_sweep_dist = perch_sweep_dist + capsule.radius;

        let perch = self.compute_floor_dist(
            perch_center,
            up,
            gravity_dir,
            falling,
            capsule,
            perch_line_dist,
            actual_sweep_dist,
            test_radius,
            None,
        );

        if !perch.is_walkable_floor() {
            None
        } else if hit_above_base + perch.floor_dist > max_floor_dist {
            // Hit ground is too far below the ledge
            None
        } else {
            Some(perch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{plane::Surface, PlaneWorld};
    use approx::assert_relative_eq;

    fn capsule() -> Capsule { Capsule::new(34.0, 88.0) }

    fn scanner<'a>(world: &'a PlaneWorld, config: &'a MoveConfig) -> FloorScanner<'a, PlaneWorld> {
        FloorScanner { world, config }
    }

    #[test]
    fn finds_flat_floor_below() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let pos = Vec3::new(0.0, 0.0, 90.0);
        let floor = scan.find_floor(pos, Dir::up(), Dir::down(), false, capsule(), None);
        assert!(floor.is_walkable_floor());
        assert!(!floor.line_trace);
        assert_relative_eq!(floor.floor_dist, 2.0, epsilon = 0.05);
    }

    #[test]
    fn floor_too_far_is_not_walkable() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let pos = Vec3::new(0.0, 0.0, 300.0);
        let floor = scan.find_floor(pos, Dir::up(), Dir::down(), true, capsule(), None);
        assert!(!floor.is_walkable_floor());
    }

    #[test]
    fn steep_slope_is_rejected() {
        let mut world = PlaneWorld::new();
        // 60 degree slope, steeper than the default 44.7 degree limit
        let normal = Dir::from_unnormalized(Vec3::new(0.866, 0.0, 0.5)).unwrap();
        world.add_plane(normal, Vec3::zero());
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let hit = Hit {
            blocking: true,
            start_penetrating: false,
            fraction: 0.5,
            location: Vec3::unit_z() * 100.0,
            normal,
            impact_normal: normal,
            impact_point: Vec3::zero(),
            penetration_depth: 0.0,
            surface: crate::world::SurfaceId(0),
        };
        assert!(!scan.is_walkable(&hit, Dir::up(), Dir::down(), false));
    }

    #[test]
    fn walkable_override_loosens_slope_limit() {
        let mut world = PlaneWorld::new();
        let normal = Dir::from_unnormalized(Vec3::new(0.866, 0.0, 0.5)).unwrap();
        let id = world.add_surface(Surface::plane(normal, Vec3::zero()).with_walkable_override(0.4));
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let hit = Hit {
            blocking: true,
            start_penetrating: false,
            fraction: 0.5,
            location: Vec3::unit_z() * 100.0,
            normal,
            impact_normal: normal,
            impact_point: Vec3::zero(),
            penetration_depth: 0.0,
            surface: id,
        };
        assert!(scan.is_walkable(&hit, Dir::up(), Dir::down(), false));
    }

    #[test]
    fn falling_requires_surface_to_oppose_gravity() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let hit = Hit {
            blocking: true,
            start_penetrating: false,
            fraction: 0.5,
            location: Vec3::unit_z() * 90.0,
            normal: Dir::up(),
            impact_normal: Dir::up(),
            impact_point: Vec3::zero(),
            penetration_depth: 0.0,
            surface: crate::world::SurfaceId(0),
        };
        // Gravity pulling sideways: the flat floor no longer opposes it
        assert!(!scan.is_walkable(&hit, Dir::up(), Dir::new(Vec3::unit_x()), true));
        let lenient = MoveConfig {
            land_on_any_surface: true,
            ..Default::default()
        };
        let scan = scanner(&world, &lenient);
        assert!(scan.is_walkable(&hit, Dir::up(), Dir::new(Vec3::unit_x()), true));
    }

    #[test]
    fn sideways_gravity_floor_scan() {
        // A wall becomes the floor when up points along -x
        let mut world = PlaneWorld::new();
        world.add_plane(Dir::new(-Vec3::unit_x()), Vec3::new(100.0, 0.0, 0.0));
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let up = Dir::new(-Vec3::unit_x());
        let pos = Vec3::new(100.0 - 90.0, 0.0, 0.0);
        let floor = scan.find_floor(pos, up, -up, false, capsule(), None);
        assert!(floor.is_walkable_floor());
        assert_relative_eq!(floor.floor_dist, 2.0, epsilon = 0.05);
    }

    #[test]
    fn edge_tolerance_bounds() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let scan = scanner(&world, &config);
        let pos = Vec3::zero();
        assert!(scan.is_within_edge_tolerance(pos, Dir::up(), Vec3::new(10.0, 0.0, -88.0), 34.0));
        assert!(!scan.is_within_edge_tolerance(pos, Dir::up(), Vec3::new(33.95, 0.0, -88.0), 34.0));
    }
}
