//! Ground locomotion
//!
//! Walking hovers the capsule a small distance above the supporting
//! surface, steers velocity inside the floor plane and converts floor
//! loss into falling (or a reverted move when ledge walking is off).

use super::Simulator;
use crate::{
    consts::{KINDA_SMALL_NUMBER, MAX_FLOOR_DIST, MIN_FLOOR_DIST, MIN_TICK_TIME, SMALL_NUMBER},
    gravity::GravitySampler,
    mode::MoveMode,
    state::MoveInput,
    world::{CollisionWorld, Hit},
};
use vek::*;

impl<W: CollisionWorld, S: GravitySampler> Simulator<'_, W, S> {
    pub(crate) fn phys_walking(&mut self, input: &MoveInput, dt: f32) {
        if dt < MIN_TICK_TIME {
            return;
        }
        let mut remaining = dt;
        let mut checked_fall = false;
        let mut tried_ledge_move = false;

        while remaining >= MIN_TICK_TIME
            && self.iterations < self.config.max_simulation_iterations
            && self.state.mode == MoveMode::Walking
        {
            self.iterations += 1;
            let time_tick = self.simulation_time_step(remaining);
            remaining -= time_tick;

            let old_pos = self.state.pos.0;
            let old_floor = self.state.floor;
            let old_base = self.state.base;
            let up = self.state.up();

            self.maintain_horizontal_ground_velocity();
            let old_velocity = self.state.vel.0;
            self.state.acc -= *up * self.state.acc.dot(*up);

            let root_motion = input.root_motion.filter(|_| !self.state.just_teleported);
            if root_motion.map_or(true, |rm| rm.additive) {
                self.calc_velocity(
                    time_tick,
                    self.config.ground_friction,
                    false,
                    self.max_braking_deceleration(),
                );
            }
            match root_motion {
                Some(rm) if rm.additive => self.state.vel.0 += rm.vel,
                Some(rm) => self.state.vel.0 = rm.vel,
                None => {},
            }
            if self.state.mode == MoveMode::Falling {
                // A velocity change mid-update took us off the ground
                self.iterations -= 1;
                self.start_physics(input, remaining + time_tick);
                return;
            }

            let move_velocity = self.state.vel.0;
            let delta = move_velocity * time_tick;
            let zero_delta = delta.magnitude_squared() <= SMALL_NUMBER;
            let mut step_down_floor = None;

            if zero_delta {
                remaining = 0.0;
            } else {
                step_down_floor = self.move_along_floor(move_velocity, time_tick);
                match self.state.mode {
                    MoveMode::Falling => {
                        let desired_dist = delta.magnitude();
                        if desired_dist > KINDA_SMALL_NUMBER {
                            let lateral = {
                                let d = self.state.pos.0 - old_pos;
                                d - *up * d.dot(*up)
                            };
                            let actual_dist = lateral.magnitude();
                            remaining +=
                                time_tick * (1.0 - (actual_dist / desired_dist).min(1.0));
                        }
                        self.start_physics(input, remaining);
                        return;
                    },
                    MoveMode::Swimming => {
                        self.start_swimming(input, old_pos, old_velocity, time_tick, remaining);
                        return;
                    },
                    _ => {},
                }
            }

            // Refresh the floor under the new position
            match step_down_floor {
                Some(floor) => self.state.floor = floor,
                None => {
                    let gravity_dir = self.gravity_dir();
                    self.state.floor = self.scanner().find_floor(
                        self.state.pos.0,
                        up,
                        gravity_dir,
                        false,
                        self.state.capsule,
                        None,
                    );
                },
            }

            let check_ledges = !self.can_walk_off_ledges();
            if check_ledges && !self.state.floor.is_walkable_floor() {
                // Over the edge: try a sidestep that keeps us on the
                // floor before giving up on the move
                let new_delta = if tried_ledge_move {
                    Vec3::zero()
                } else {
                    self.ledge_move(old_pos, delta)
                };
                if new_delta != Vec3::zero() {
                    self.state.pos.0 = old_pos;
                    self.state.floor = old_floor;
                    self.state.base = old_base;
                    tried_ledge_move = true;
                    self.state.vel.0 = new_delta / time_tick;
                    remaining += time_tick;
                    continue;
                } else {
                    let must_jump = zero_delta || old_base.is_none();
                    if (must_jump || !checked_fall)
                        && self.check_fall(input, delta, old_pos, remaining, time_tick, must_jump)
                    {
                        return;
                    }
                    checked_fall = true;
                    // Revert and stand still at the edge
                    self.state.pos.0 = old_pos;
                    self.state.floor = old_floor;
                    self.state.base = old_base;
                    self.state.vel.0 = Vec3::zero();
                    remaining = 0.0;
                    break;
                }
            } else {
                if self.state.floor.is_walkable_floor() {
                    self.adjust_floor_height();
                    self.update_base_from_floor();
                } else if self
                    .state
                    .floor
                    .hit
                    .is_some_and(|h| h.start_penetrating)
                    && remaining <= 0.0
                {
                    // The floor sweep failed inside geometry; pop the
                    // capsule up instead of grinding downward
                    if let Some(hit) = self.state.floor.hit {
                        let adjustment = *hit.normal * (hit.penetration_depth + MAX_FLOOR_DIST);
                        self.resolve_penetration(adjustment);
                    }
                }

                if self.world.fluid_at(self.state.pos.0).is_some() {
                    self.set_move_mode(MoveMode::Swimming);
                    self.start_swimming(input, old_pos, old_velocity, time_tick, remaining);
                    return;
                }

                if !self.state.floor.is_walkable_floor()
                    && !self.state.floor.hit.is_some_and(|h| h.start_penetrating)
                {
                    let must_jump = self.state.just_teleported || zero_delta || old_base.is_none();
                    if (must_jump || !checked_fall)
                        && self.check_fall(input, delta, old_pos, remaining, time_tick, must_jump)
                    {
                        return;
                    }
                    checked_fall = true;
                }
            }

            if self.state.mode.is_grounded() {
                // Velocity reflects the move that actually happened
                if !self.state.just_teleported
                    && input.root_motion.is_none()
                    && time_tick >= MIN_TICK_TIME
                {
                    self.state.vel.0 = (self.state.pos.0 - old_pos) / time_tick;
                    self.maintain_horizontal_ground_velocity();
                }
            }

            // Stuck; further iterations would spin in place
            if self.state.pos.0 == old_pos {
                remaining = 0.0;
                break;
            }
        }

        if self.state.mode.is_grounded() {
            self.maintain_horizontal_ground_velocity();
        }
    }

    /// Project the planar move onto the current ramp so the capsule
    /// follows the surface instead of stair-stepping off it
    pub(crate) fn compute_ground_movement_delta(
        &self,
        delta: Vec3<f32>,
        ramp_hit: &Hit,
        hit_from_line_trace: bool,
    ) -> Vec3<f32> {
        let up = self.state.up();
        let floor_normal = ramp_hit.impact_normal;
        let contact_normal = ramp_hit.normal;
        let floor_up = floor_normal.dot(*up);
        if floor_up < 1.0 - SMALL_NUMBER
            && floor_up > KINDA_SMALL_NUMBER
            && contact_normal.dot(*up) > KINDA_SMALL_NUMBER
            && !hit_from_line_trace
        {
            // Lift the lateral delta into the ramp plane
            let ramp_delta = delta + *up * (-delta.dot(*floor_normal) / floor_up);
            if self.config.maintain_horizontal_ground_velocity {
                return ramp_delta;
            } else {
                return ramp_delta
                    .try_normalized()
                    .map_or(Vec3::zero(), |d| d * delta.magnitude());
            }
        }
        delta
    }

    /// Move across the floor for one substep, stepping up obstructions;
    /// returns the floor computed by a successful step-down, if any
    pub(crate) fn move_along_floor(
        &mut self,
        velocity: Vec3<f32>,
        dt: f32,
    ) -> Option<crate::floor::FloorResult> {
        if !self.state.floor.is_walkable_floor() {
            return None;
        }
        let up = self.state.up();
        let delta = (velocity - *up * velocity.dot(*up)) * dt;
        let floor_hit = self.state.floor.hit?;
        let ramp_delta =
            self.compute_ground_movement_delta(delta, &floor_hit, self.state.floor.line_trace);

        let mut step_down_floor = None;
        let hit = self.move_capsule(ramp_delta);
        match hit {
            Some(h) if h.start_penetrating => {
                // Deflect off whatever we are stuck in rather than hitch
                self.handle_impact(&h);
                self.slide_along_surface(delta, 1.0, h.normal);
            },
            Some(h) if h.blocking => {
                let mut percent_applied = h.fraction;
                let mut hit = h;
                if h.fraction > 0.0
                    && h.normal.dot(*up) > KINDA_SMALL_NUMBER
                    && self.is_walkable_contact(&h)
                {
                    // Another walkable ramp; keep going along it
                    let initial_remaining = 1.0 - percent_applied;
                    let ramp_delta =
                        self.compute_ground_movement_delta(delta * initial_remaining, &h, false);
                    let second = self.move_capsule(ramp_delta);
                    if let Some(second) = second {
                        hit = second;
                        percent_applied =
                            (percent_applied + second.fraction * initial_remaining).clamp(0.0, 1.0);
                    } else {
                        percent_applied = 1.0;
                    }
                }
                if percent_applied < 1.0 && hit.blocking {
                    // A barrier; try it as a stair step
                    let step_delta = delta * (1.0 - percent_applied);
                    match self.step_up(step_delta, &hit) {
                        Some(floor) => {
                            self.state.just_teleported |=
                                !self.config.maintain_horizontal_ground_velocity;
                            step_down_floor = Some(floor);
                        },
                        None => {
                            self.handle_impact(&hit);
                            self.slide_along_surface(delta, 1.0 - percent_applied, hit.normal);
                        },
                    }
                }
            },
            _ => {},
        }
        step_down_floor
    }

    fn is_walkable_contact(&mut self, hit: &Hit) -> bool {
        let up = self.state.up();
        let gravity_dir = self.gravity_dir();
        self.scanner().is_walkable(hit, up, gravity_dir, false)
    }

    /// Keep the capsule floating inside the floor distance band
    pub(crate) fn adjust_floor_height(&mut self) {
        if !self.state.floor.is_walkable_floor() {
            return;
        }
        let mut old_floor_dist = self.state.floor.floor_dist;
        if self.state.floor.line_trace {
            if old_floor_dist < MIN_FLOOR_DIST && self.state.floor.line_dist >= MIN_FLOOR_DIST {
                // Moving up would scale unwalkable walls
                return;
            }
            // The sweep was unusable, trust the line distance
            old_floor_dist = self.state.floor.line_dist;
        }
        if (MIN_FLOOR_DIST..=MAX_FLOOR_DIST).contains(&old_floor_dist) {
            return;
        }

        let up = self.state.up();
        let initial_height = self.state.pos.0.dot(*up);
        let avg_floor_dist = (MIN_FLOOR_DIST + MAX_FLOOR_DIST) * 0.5;
        let move_dist = avg_floor_dist - old_floor_dist;
        let adjust_hit = self.move_capsule(*up * move_dist);

        match adjust_hit.filter(|h| h.blocking) {
            None => {
                self.state.floor.floor_dist += move_dist;
            },
            Some(_) if move_dist > 0.0 => {
                let moved = self.state.pos.0.dot(*up) - initial_height;
                self.state.floor.floor_dist += moved;
            },
            Some(hit) => {
                let moved = self.state.pos.0.dot(*up) - initial_height;
                self.state.floor.floor_dist = old_floor_dist + moved;
                if self.is_walkable_contact(&hit) {
                    let dist = self.state.floor.floor_dist;
                    self.state.floor.set_from_sweep(hit, dist, true);
                }
            },
        }

        // The hover correction is not real motion
        self.state.just_teleported |=
            !self.config.maintain_horizontal_ground_velocity || old_floor_dist < 0.0;
    }

    /// Lateral alternative to a move that ran off a ledge
    fn ledge_move(&mut self, old_pos: Vec3<f32>, delta: Vec3<f32>) -> Vec3<f32> {
        if delta == Vec3::zero() {
            return Vec3::zero();
        }
        let up = self.state.up();
        let side = up.cross(delta);
        for dir in [side, -side] {
            if self.check_ledge_direction(old_pos, dir) {
                return dir;
            }
        }
        Vec3::zero()
    }

    /// Whether a sidestep of `side_step` from `old_pos` lands on
    /// walkable floor
    fn check_ledge_direction(&mut self, old_pos: Vec3<f32>, side_step: Vec3<f32>) -> bool {
        use crate::world::{capsule_rot, SweepShape};
        let up = self.state.up();
        let shape = SweepShape::Capsule(self.state.capsule);
        let rot = capsule_rot(up);
        let side_dest = old_pos + side_step;
        let hit = self.world.sweep(shape, rot, old_pos, side_dest);
        let gravity_dir = self.gravity_dir();
        match hit {
            Some(h) if h.blocking => self.scanner().is_walkable(&h, up, gravity_dir, false),
            _ => {
                let drop = *up
                    * -(self.config.max_step_height + self.config.ledge_check_threshold);
                match self.world.sweep(shape, rot, side_dest, side_dest + drop) {
                    Some(h) if h.blocking && h.fraction < 1.0 => {
                        self.scanner().is_walkable(&h, up, gravity_dir, false)
                    },
                    _ => false,
                }
            },
        }
    }

    fn can_walk_off_ledges(&self) -> bool {
        if self.state.crouching {
            self.config.can_walk_off_ledges_when_crouching
        } else {
            self.config.can_walk_off_ledges
        }
    }

    /// Hand over to falling if leaving the ground is allowed here
    pub(crate) fn check_fall(
        &mut self,
        input: &MoveInput,
        delta: Vec3<f32>,
        old_pos: Vec3<f32>,
        remaining: f32,
        time_tick: f32,
        must_jump: bool,
    ) -> bool {
        if must_jump || self.can_walk_off_ledges() {
            if self.state.mode.is_grounded() {
                self.start_falling(input, remaining, time_tick, delta, old_pos);
            }
            return true;
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
        sim::Simulator,
        state::{MoveInput, MovementState},
        util::Dir,
        world::{plane::Surface, Capsule, PlaneWorld},
    };
    use approx::assert_relative_eq;
    use vek::*;

    #[test]
    fn ramp_crossing_keeps_speed_when_not_flattening_velocity() {
        let mut world = PlaneWorld::flat_floor();
        // 30 degree ramp rising from x = 1000
        let normal = Dir::from_unnormalized(Vec3::new(-0.5, 0.0, 0.866_025_4)).unwrap();
        world.add_surface(
            Surface::plane(normal, Vec3::new(1000.0, 0.0, 0.0)).bounded(Aabb {
                min: Vec3::new(990.0, -10_000.0, -10.0),
                max: Vec3::new(100_000.0, 10_000.0, 100_000.0),
            }),
        );
        let config = MoveConfig {
            maintain_horizontal_ground_velocity: false,
            ..Default::default()
        };
        let mut state = MovementState::new(Vec3::new(0.0, 0.0, 90.0), Capsule::new(34.0, 88.0));
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        let input = MoveInput {
            acc: Vec3::unit_x() * 2048.0,
            ..Default::default()
        };

        // Reach full speed on the flat section
        {
            let mut sim =
                Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
            for _ in 0..90 {
                sim.tick(&input, 1.0 / 60.0);
            }
        }
        assert_eq!(state.mode, MoveMode::Walking);
        let flat_speed = state.vel.0.magnitude();
        assert_relative_eq!(flat_speed, config.max_walk_speed, epsilon = 1.0);

        // Cross onto the ramp and climb
        {
            let mut sim =
                Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
            for _ in 0..120 {
                sim.tick(&input, 1.0 / 60.0);
            }
        }
        assert_eq!(state.mode, MoveMode::Walking);
        assert!(state.pos.0.x > 1400.0);
        assert!(state.pos.0.z > 250.0);
        // Speed magnitude survives the slope change
        assert_relative_eq!(state.vel.0.magnitude(), flat_speed, epsilon = 1.0);
    }
}
