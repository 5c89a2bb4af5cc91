//! Deflection off blocking surfaces and stair stepping
//!
//! Everything here is expressed relative to the capsule up axis, so the
//! same code handles walls, ramps and steps no matter which way gravity
//! points.

use crate::{
    consts::{KINDA_SMALL_NUMBER, MAX_FLOOR_DIST, MAX_STEP_SIDE_NORMAL},
    gravity::GravitySampler,
    mode::MoveMode,
    sim::Simulator,
    util::{Dir, Plane, Projection},
    world::{CollisionWorld, Hit},
};
use vek::*;

impl<W: CollisionWorld, S: GravitySampler> Simulator<'_, W, S> {
    /// Portion of `delta` that can continue along the surface with
    /// `normal` after a blocking hit at `1 - time`
    pub(crate) fn compute_slide_vector(
        &mut self,
        delta: Vec3<f32>,
        time: f32,
        normal: Dir,
    ) -> Vec3<f32> {
        let slide = delta.projected(&Plane::from(normal)) * time;
        if self.state.mode == MoveMode::Falling {
            self.handle_slope_boosting(slide, delta, time, normal)
        } else {
            slide
        }
    }

    /// Keep airborne deflections from pushing the capsule higher than the
    /// blocked move would have gone
    fn handle_slope_boosting(
        &mut self,
        slide_result: Vec3<f32>,
        delta: Vec3<f32>,
        time: f32,
        normal: Dir,
    ) -> Vec3<f32> {
        let up = self.state.up();
        let mut result = slide_result;
        let up_result = result.dot(*up);
        if up_result > 0.0 {
            let up_limit = delta.dot(*up) * time;
            if up_result - up_limit > KINDA_SMALL_NUMBER {
                if up_limit > 0.0 {
                    // Rescale the whole vector, not just the vertical
                    // component, or the direction change would head right
                    // back into the impact
                    result *= up_limit / up_result;
                } else {
                    // Heading down but deflecting up; keep it level
                    result = Vec3::zero();
                }
                // Slide the remainder laterally along the impact
                let remainder = slide_result - result;
                let remainder_lateral = remainder - *up * remainder.dot(*up);
                let normal_lateral = *normal - *up * normal.dot(*up);
                if let Some(normal_lateral) = Dir::from_unnormalized(normal_lateral) {
                    result += remainder_lateral.projected(&Plane::from(normal_lateral));
                }
            }
        }
        result
    }

    /// Try to climb the obstruction in `hit` as a stair step
    ///
    /// Moves up, forward and back down in one revertible unit. Returns
    /// false (restoring the starting position) when the obstruction is
    /// too tall, unwalkable at the top, or only clipped at the capsule
    /// edge.
    pub(crate) fn step_up(&mut self, delta: Vec3<f32>, hit: &Hit) -> Option<crate::floor::FloorResult> {
        if self.config.max_step_height <= 0.0 || !self.world.can_step_up_on(hit.surface) {
            return None;
        }
        let up = self.state.up();
        let old_pos = self.state.pos.0;
        let radius = self.state.capsule.radius;
        let half_height = self.state.capsule.half_height;

        // Impacts on the upper hemisphere cannot be steps
        let initial_impact_height = (hit.impact_point - old_pos).dot(*up);
        if initial_impact_height > half_height - radius {
            return None;
        }

        let gravity_dir = self.gravity_dir();
        let step_side_dot = -hit.impact_normal.dot(*gravity_dir);

        let mut travel_up = self.config.max_step_height;
        let mut travel_down = travel_up;
        // Height of the capsule base, measured from the center along up
        let mut floor_base_height = -half_height;
        let mut floor_point_height = floor_base_height;

        if self.state.mode.is_grounded() && self.state.floor.is_walkable_floor() {
            // The capsule floats a variable amount off the floor, so the
            // step limit is enforced from the real contact point
            let floor_dist = self.state.floor.distance_to_floor().max(0.0);
            floor_base_height -= floor_dist;
            travel_up = (travel_up - floor_dist).max(0.0);
            travel_down = self.config.max_step_height + MAX_FLOOR_DIST * 2.0;

            let hit_vertical_face =
                !self
                    .scanner()
                    .is_within_edge_tolerance(hit.location, up, hit.impact_point, radius);
            if !self.state.floor.line_trace && !hit_vertical_face {
                if let Some(floor_hit) = &self.state.floor.hit {
                    floor_point_height = (floor_hit.impact_point - old_pos).dot(*up);
                }
            } else {
                floor_point_height -= self.state.floor.floor_dist;
            }
        }

        // The impact is below the supporting floor, nothing to climb
        if initial_impact_height <= floor_base_height {
            return None;
        }

        let saved = self.state.clone();
        let revert = |sim: &mut Self, saved: &crate::state::MovementState| {
            *sim.state = saved.clone();
        };

        // Up
        let up_hit = self.move_capsule(*up * travel_up);
        if up_hit.is_some_and(|h| h.start_penetrating) {
            revert(self, &saved);
            return None;
        }

        // Forward
        let fwd_hit = self.move_capsule(delta);
        if let Some(fwd) = fwd_hit.filter(|h| h.blocking) {
            if fwd.start_penetrating {
                revert(self, &saved);
                return None;
            }
            let forward_hit_time = fwd.fraction;
            let slide_applied = self.slide_along_surface(delta, 1.0 - fwd.fraction, fwd.normal);
            if self.state.mode == MoveMode::Falling {
                revert(self, &saved);
                return None;
            }
            if forward_hit_time == 0.0 && slide_applied == 0.0 {
                // Pinned against the obstruction
                revert(self, &saved);
                return None;
            }
        }

        // Down
        let down_hit = self.move_capsule(-*up * travel_down);
        let down = match down_hit {
            Some(h) if h.start_penetrating => {
                revert(self, &saved);
                return None;
            },
            Some(h) if h.blocking => h,
            _ => {
                // Landed nowhere; let the caller's floor logic sort it out
                return Some(self.state.floor);
            },
        };

        // Climbed height measured from the original contact point
        let step_height = (down.impact_point - old_pos).dot(*up) - floor_point_height;
        if step_height > self.config.max_step_height {
            revert(self, &saved);
            return None;
        }

        let pseudo = down;
        if !self
            .scanner()
            .is_walkable(&pseudo, up, gravity_dir, false)
        {
            // Unwalkable top surface: reject when its normal opposes the
            // move or when stepping down left us above where we started
            if delta.dot(*down.impact_normal) < 0.0 {
                revert(self, &saved);
                return None;
            }
            if (down.location - old_pos).dot(*up) > 0.0 {
                revert(self, &saved);
                return None;
            }
        }

        if !self
            .scanner()
            .is_within_edge_tolerance(down.location, up, down.impact_point, radius)
        {
            revert(self, &saved);
            return None;
        }

        if step_height > 0.0 && !self.world.can_step_up_on(down.surface) {
            revert(self, &saved);
            return None;
        }

        // Validate the floor at the landing point
        let floor = self.scanner().find_floor(
            self.state.pos.0,
            up,
            gravity_dir,
            false,
            self.state.capsule,
            Some(&down),
        );
        if (down.location - old_pos).dot(*up) > 0.0 {
            // Stepping onto a ledge: surfaces close to vertical at the
            // contact are a wall clip, not a step
            if !floor.blocking_hit && step_side_dot < MAX_STEP_SIDE_NORMAL {
                revert(self, &saved);
                return None;
            }
        }
        Some(floor)
    }

    /// Whether the airborne capsule may settle onto the surface in `hit`
    pub(crate) fn is_valid_landing_spot(&mut self, capsule_location: Vec3<f32>, hit: &Hit) -> bool {
        if !hit.blocking {
            return false;
        }
        let up = self.state.up();
        let gravity_dir = self.gravity_dir();
        if !hit.start_penetrating {
            if !self.scanner().is_walkable(hit, up, gravity_dir, true) {
                return false;
            }
            // Impacts above the lower hemisphere come from sliding down a
            // vertical face, not from a floor
            let radius = self.state.capsule.radius;
            let half_height = self.state.capsule.half_height;
            let lower_hemisphere_top = (hit.location + *up * (radius - half_height)).dot(*up);
            if hit.impact_point.dot(*up) >= lower_hemisphere_top {
                return false;
            }
            if !self
                .scanner()
                .is_within_edge_tolerance(hit.location, up, hit.impact_point, radius)
            {
                return false;
            }
        } else if hit.normal.dot(*up) < KINDA_SMALL_NUMBER {
            // Penetrating a wall, not a floor
            return false;
        }

        let floor = self.scanner().find_floor(
            capsule_location,
            up,
            gravity_dir,
            false,
            self.state.capsule,
            Some(hit),
        );
        floor.is_walkable_floor()
    }

    /// An edge clip on the lower hemisphere can hide a walkable surface
    /// right on top of the edge; worth a dedicated floor probe
    pub(crate) fn should_check_for_valid_landing_spot(&self, hit: &Hit) -> bool {
        let up = self.state.up();
        if hit.normal.dot(*up) > KINDA_SMALL_NUMBER && hit.normal != hit.impact_normal {
            return self.scanner().is_within_edge_tolerance(
                hit.location,
                up,
                hit.impact_point,
                self.state.capsule.radius,
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::MoveConfig,
        gravity::GravityProvider,
        mode::MoveMode,
        state::{MoveInput, MovementState},
        world::{plane::Surface, Capsule, PlaneWorld},
    };
    use approx::assert_relative_eq;
    use vek::*;

    use super::Simulator;

    fn walking_agent(world: &PlaneWorld, config: &MoveConfig) -> MovementState {
        let mut state = MovementState::new(Vec3::new(0.0, 0.0, 90.0), Capsule::new(34.0, 88.0));
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        let mut sim = Simulator::new(world, &(), config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&MoveInput::default(), 1.0 / 60.0);
        assert_eq!(state.mode, MoveMode::Walking);
        state
    }

    #[test]
    fn climbs_a_low_step() {
        let mut world = PlaneWorld::flat_floor();
        // 30 cm step from x = 100 onward
        world.add_surface(Surface::plane(crate::util::Dir::up(), Vec3::new(150.0, 0.0, 30.0)).bounded(
            Aabb {
                min: Vec3::new(100.0, -500.0, -10.0),
                max: Vec3::new(10_000.0, 500.0, 40.0),
            },
        ));
        let config = MoveConfig::default();
        let mut state = walking_agent(&world, &config);
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        let input = MoveInput {
            acc: Vec3::unit_x() * 2048.0,
            ..Default::default()
        };
        let mut sim =
            Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        for _ in 0..120 {
            sim.tick(&input, 1.0 / 60.0);
        }
        assert_eq!(state.mode, MoveMode::Walking);
        assert!(state.pos.0.x > 150.0);
        // Standing on top of the step, within the floor hover band
        assert_relative_eq!(state.pos.0.z, 30.0 + 88.0 + 2.15, epsilon = 1.0);
    }

    #[test]
    fn wall_taller_than_step_height_blocks() {
        let mut world = PlaneWorld::flat_floor();
        // A wall facing -x at x = 200
        world.add_surface(
            Surface::plane(crate::util::Dir::new(-Vec3::unit_x()), Vec3::new(200.0, 0.0, 0.0))
                .bounded(Aabb {
                    min: Vec3::new(190.0, -500.0, 0.0),
                    max: Vec3::new(210.0, 500.0, 500.0),
                }),
        );
        let config = MoveConfig::default();
        let mut state = walking_agent(&world, &config);
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        let input = MoveInput {
            acc: Vec3::unit_x() * 2048.0,
            ..Default::default()
        };
        let mut sim =
            Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        for _ in 0..120 {
            sim.tick(&input, 1.0 / 60.0);
        }
        assert_eq!(state.mode, MoveMode::Walking);
        // Stopped with the capsule surface at the wall
        assert!(state.pos.0.x <= 200.0 - 34.0 + 0.5);
        assert!(state.pos.0.z < 95.0);
    }

    #[test]
    fn slide_preserves_lateral_motion_along_wall() {
        let mut world = PlaneWorld::flat_floor();
        world.add_surface(
            Surface::plane(crate::util::Dir::new(-Vec3::unit_x()), Vec3::new(200.0, 0.0, 0.0))
                .bounded(Aabb {
                    min: Vec3::new(190.0, -10_000.0, 0.0),
                    max: Vec3::new(210.0, 10_000.0, 500.0),
                }),
        );
        let config = MoveConfig::default();
        let mut state = walking_agent(&world, &config);
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        // Pushing diagonally into the wall
        let input = MoveInput {
            acc: Vec3::new(1448.0, 1448.0, 0.0),
            ..Default::default()
        };
        let mut sim =
            Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        for _ in 0..240 {
            sim.tick(&input, 1.0 / 60.0);
        }
        // The wall eats the x motion, the y motion continues
        assert!(state.pos.0.y > 500.0);
        assert!(state.pos.0.x <= 200.0 - 34.0 + 0.5);
    }
}
