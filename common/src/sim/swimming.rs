//! Fluid locomotion
//!
//! Swimming blends gravity against buoyancy scaled by immersion depth,
//! damps input near the surface so the capsule does not porpoise out of
//! the water, and steps up onto banks at the water's edge.

use super::Simulator;
use crate::{
    consts::{
        KINDA_SMALL_NUMBER, MIN_TICK_TIME, SWIM_SURFACE_ACCEL_SCALE, SWIM_SURFACE_DEPTH,
        SWIM_FRICTION_DEPTH_SCALE,
    },
    gravity::GravitySampler,
    mode::MoveMode,
    state::MoveInput,
    world::CollisionWorld,
};
use vek::*;

/// Small downward speed kept while bobbing at the surface
const SWIM_BOB_SPEED: f32 = -80.0;

impl<W: CollisionWorld, S: GravitySampler> Simulator<'_, W, S> {
    pub(crate) fn phys_swimming(&mut self, input: &MoveInput, dt: f32) {
        if dt < MIN_TICK_TIME {
            return;
        }
        let up = self.state.up();
        let depth = self.immersion_depth();
        let net_buoyancy = self.config.buoyancy * depth;
        let original_vel_up = self.state.vel.0.dot(*up);

        if !self.state.just_teleported
            && original_vel_up > 0.33 * self.config.max_swim_speed
            && net_buoyancy != 0.0
        {
            // Damp the upward launch out of the water
            let lateral = self.state.vel.0 - *up * original_vel_up;
            self.state.vel.0 = lateral + *up * (original_vel_up * depth * depth);
        }

        // Surface-damped input so small accelerations cannot fling the
        // capsule clear of the water
        if depth < SWIM_SURFACE_DEPTH && self.state.acc.dot(*up) > 0.0 {
            let acc_up = self.state.acc.dot(*up);
            self.state.acc += *up * (acc_up * SWIM_SURFACE_ACCEL_SCALE - acc_up);
        }

        self.iterations += 1;
        let old_pos = self.state.pos.0;
        self.state.just_teleported = false;

        let fluid = self.world.fluid_at(self.state.pos.0).unwrap_or_default();
        let friction = SWIM_FRICTION_DEPTH_SCALE * fluid.friction * depth;
        if input.root_motion.is_none() {
            self.calc_velocity(dt, friction, true, self.max_braking_deceleration());
            let gravity = self.gravity_accel();
            self.state.vel.0 += gravity * dt * (1.0 - net_buoyancy);
        } else if let Some(rm) = input.root_motion {
            if rm.additive {
                self.state.vel.0 += rm.vel;
            } else {
                self.state.vel.0 = rm.vel;
            }
        }

        let adjusted = self.state.vel.0 * dt;
        let hit = self.move_capsule(adjusted);
        let mut remaining = dt * self.swim_air_time(old_pos, adjusted);

        if let Some(hit) = hit.filter(|h| h.blocking) {
            let gravity_dir = self.gravity_dir();
            let vel_dir = self.state.vel.0.try_normalized().unwrap_or(*gravity_dir);
            let up_down = gravity_dir.dot(vel_dir);
            let mut stepped_up = false;
            // A bank at the water's edge reads as a wall; step onto it
            if hit.impact_normal.dot(*up).abs() < 0.2
                && (-0.2..0.5).contains(&up_down)
                && self.world.can_step_up_on(hit.surface)
            {
                let step_delta = adjusted * (1.0 - hit.fraction);
                stepped_up = self.step_up(step_delta, &hit).is_some();
            }
            if !stepped_up {
                self.handle_impact(&hit);
                self.slide_along_surface(adjusted, 1.0 - hit.fraction, hit.normal);
            }
        }

        if input.root_motion.is_none()
            && !self.state.just_teleported
            && (dt - remaining) > KINDA_SMALL_NUMBER
        {
            let left_water = self.world.fluid_at(self.state.pos.0).is_none();
            let vel_up = self.state.vel.0.dot(*up);
            self.state.vel.0 = (self.state.pos.0 - old_pos) / (dt - remaining);
            if left_water {
                // Keep the vertical launch that carried us out
                let lateral = self.state.vel.0 - *up * self.state.vel.0.dot(*up);
                self.state.vel.0 = lateral + *up * vel_up;
            }
        }

        if self.world.fluid_at(self.state.pos.0).is_none() {
            if self.check_water_jump() {
                return;
            }
            if self.state.mode == MoveMode::Swimming {
                self.set_move_mode(MoveMode::Falling);
            }
        }
        if self.state.mode != MoveMode::Swimming {
            if remaining <= 0.0 {
                remaining = dt * 0.5;
            }
            self.start_physics(input, remaining);
        }
    }

    /// Fraction of the body submerged, 0 at the head and 1 fully under
    pub(crate) fn immersion_depth(&self) -> f32 {
        let up = self.state.up();
        let head = self.state.pos.0 + *up * self.state.capsule.half_height;
        let toe = self.state.pos.0 - *up * self.state.capsule.half_height;
        if self.world.fluid_at(head).is_some() {
            return 1.0;
        }
        match self.world.water_line(head, toe) {
            Some(line) => {
                let span = self.state.capsule.half_height * 2.0;
                ((head - line).magnitude() / span).clamp(0.0, 1.0)
            },
            None => {
                if self.world.fluid_at(toe).is_some() {
                    1.0
                } else {
                    0.0
                }
            },
        }
    }

    /// Fraction of the move spent outside the water; moves the capsule
    /// back to the water line when the move overshot the surface
    fn swim_air_time(&mut self, start: Vec3<f32>, delta: Vec3<f32>) -> f32 {
        if self.world.fluid_at(self.state.pos.0).is_some() {
            return 0.0;
        }
        let end = self.state.pos.0;
        let Some(line) = self.world.water_line(end, start) else {
            return 0.0;
        };
        let desired_dist = delta.magnitude();
        if line != end && desired_dist > KINDA_SMALL_NUMBER {
            let mut air_time = (line - end).magnitude() / desired_dist;
            if (end - start).dot(delta) < 0.0 {
                air_time = 0.0;
            }
            self.move_capsule(line - end);
            return air_time;
        }
        0.0
    }

    /// Leap out of the water when swimming into a bank with sky above it
    pub(crate) fn check_water_jump(&mut self) -> bool {
        let up = self.state.up();
        let lateral_vel = self.state.vel.0 - *up * self.state.vel.0.dot(*up);
        let Some(check_dir) = lateral_vel.try_normalized() else {
            return false;
        };
        let check_point =
            self.state.pos.0 + check_dir * (self.state.capsule.radius * 1.2);
        let wall = self
            .world
            .line_trace(self.state.pos.0, check_point)
            .filter(|h| h.blocking && h.impact_normal.dot(*up).abs() < 0.2);
        if wall.is_none() {
            return false;
        }
        // Clear above the wall means we can climb out
        let above = check_point + *up * self.state.capsule.half_height;
        if self.world.line_trace(check_point, above).is_some() {
            return false;
        }
        self.state.vel.0 += *up * self.config.out_of_water_jump_velocity;
        self.set_move_mode(MoveMode::Falling);
        true
    }

    /// Transition into (or out of) water mid-substep, reconstructing the
    /// end-of-step velocity from the average the move represented
    pub(crate) fn start_swimming(
        &mut self,
        input: &MoveInput,
        old_pos: Vec3<f32>,
        old_velocity: Vec3<f32>,
        time_tick: f32,
        mut remaining: f32,
    ) {
        if remaining < MIN_TICK_TIME || time_tick < MIN_TICK_TIME {
            return;
        }
        if input.root_motion.is_none() && !self.state.just_teleported {
            // Displacement gives the average velocity; the end velocity
            // carries twice the acceleration of the average
            let avg = (self.state.pos.0 - old_pos) / time_tick;
            let fluid = self.world.fluid_at(self.state.pos.0).unwrap_or_default();
            self.state.vel.0 = super::clamp_to_max(avg * 2.0 - old_velocity, fluid.terminal_velocity);
        }

        if self.world.fluid_at(self.state.pos.0).is_some() {
            // Entered the water partway through the move; back up to the
            // crossing point and refund the submerged time
            if let Some(line) = self.world.water_line(old_pos, self.state.pos.0) {
                let actual_dist = (self.state.pos.0 - old_pos).magnitude();
                if line != self.state.pos.0 && actual_dist > KINDA_SMALL_NUMBER {
                    let water_time =
                        time_tick * (line - self.state.pos.0).magnitude() / actual_dist;
                    remaining += water_time;
                    self.move_capsule(line - self.state.pos.0);
                }
            }
            let up = self.state.up();
            let vel_up = self.state.vel.0.dot(*up);
            if (SWIM_BOB_SPEED..0.0).contains(&vel_up) {
                // Smooth bob instead of a hard stop at the surface
                let lateral = self.state.vel.0 - *up * vel_up;
                self.state.vel.0 =
                    lateral + *up * (SWIM_BOB_SPEED - lateral.magnitude() * 0.7);
            }
            if self.state.mode != MoveMode::Swimming {
                self.set_move_mode(MoveMode::Swimming);
            }
        }
        self.start_physics(input, remaining);
    }
}
