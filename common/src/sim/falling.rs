//! Airborne locomotion
//!
//! Falling integrates gravity with the midpoint method, lets a limited
//! amount of lateral air control through, lands on walkable surfaces and
//! deflects off everything else. The jump apex is hit exactly by
//! substepping to the analytic apex time.

use super::{clamp_to_max, Simulator};
use crate::{
    consts::{KINDA_SMALL_NUMBER, MIN_TICK_TIME, SMALL_NUMBER, VERTICAL_SLOPE_NORMAL},
    gravity::GravitySampler,
    mode::MoveMode,
    outcome::Outcome,
    state::MoveInput,
    util::{Dir, Plane, Projection},
    world::{CollisionWorld, Hit},
};
use vek::*;

impl<W: CollisionWorld, S: GravitySampler> Simulator<'_, W, S> {
    pub(crate) fn phys_falling(&mut self, input: &MoveInput, dt: f32) {
        if dt < MIN_TICK_TIME {
            return;
        }
        if self.gravity.magnitude() <= SMALL_NUMBER
            || self
                .gravity
                .direction(self.state.pos.0, self.sampler)
                .is_none()
        {
            // No field to fall through; freeze instead of drifting
            self.state.vel.0 = Vec3::zero();
            self.state.acc = Vec3::zero();
            return;
        }

        let fall_acceleration = self.falling_lateral_acceleration();
        let has_air_control = fall_acceleration.magnitude_squared() > SMALL_NUMBER;

        let mut remaining = dt;
        while remaining >= MIN_TICK_TIME
            && self.iterations < self.config.max_simulation_iterations
            && self.state.mode == MoveMode::Falling
        {
            self.iterations += 1;
            let mut time_tick = self.simulation_time_step(remaining);
            remaining -= time_tick;

            let old_pos = self.state.pos.0;
            let up = self.state.up();
            self.state.just_teleported = false;

            let old_velocity = self.state.vel.0;

            // Lateral input, with and without air control so impacts can
            // retract the controlled part
            let up_comp = old_velocity.dot(*up);
            let lateral = old_velocity - *up * up_comp;
            let mut velocity_no_air = {
                let saved_acc = self.state.acc;
                self.state.acc = Vec3::zero();
                let saved_vel = self.state.vel.0;
                self.state.vel.0 = lateral;
                self.calc_velocity(
                    time_tick,
                    self.config.falling_lateral_friction,
                    false,
                    self.config.braking_deceleration_falling,
                );
                let no_air = self.state.vel.0 + *up * up_comp;
                self.state.vel.0 = saved_vel;
                self.state.acc = saved_acc;
                no_air
            };
            {
                let saved_acc = self.state.acc;
                self.state.acc = fall_acceleration;
                self.state.vel.0 = lateral;
                self.calc_velocity(
                    time_tick,
                    self.config.falling_lateral_friction,
                    false,
                    self.config.braking_deceleration_falling,
                );
                self.state.vel.0 += *up * up_comp;
                self.state.acc = saved_acc;
            }
            if !has_air_control {
                velocity_no_air = self.state.vel.0;
            }

            // Gravity, withheld while a held jump still applies force
            let gravity = self.gravity_accel();
            let mut gravity_time = time_tick;
            if let Some(hold) = self.state.jump_hold_time {
                let force_remaining = (self.config.jump_max_hold_time - hold).max(0.0);
                if force_remaining > 0.0 && !self.config.apply_gravity_while_jumping {
                    gravity_time = (time_tick - force_remaining.min(time_tick)).max(0.0);
                } else if force_remaining <= 0.0 && self.config.jump_max_hold_time > 0.0 {
                    self.state.jump_hold_time = None;
                }
            }
            self.state.vel.0 = self.new_fall_velocity(self.state.vel.0, gravity, gravity_time);
            velocity_no_air = if has_air_control {
                self.new_fall_velocity(velocity_no_air, gravity, gravity_time)
            } else {
                self.state.vel.0
            };
            let air_control_accel = (self.state.vel.0 - velocity_no_air) / time_tick;

            if let Some(rm) = input.root_motion {
                if rm.additive {
                    self.state.vel.0 += rm.vel;
                } else {
                    // Keep the gravity component under root motion
                    let up_vel = self.state.vel.0.dot(*up);
                    self.state.vel.0 = rm.vel - *up * rm.vel.dot(*up) + *up * up_vel;
                }
            }
            if let Some(hold) = self.state.jump_hold_time.as_mut() {
                *hold += time_tick;
            }

            // Substep exactly to the apex when this step crosses it
            let up_dir = -Dir::from_unnormalized(gravity).unwrap_or(Dir::down());
            let old_up_speed = old_velocity.dot(*up_dir);
            let new_up_speed = self.state.vel.0.dot(*up_dir);
            if self.apex_attempts < self.config.max_jump_apex_attempts
                && old_up_speed > 0.0
                && new_up_speed <= 0.0
                && time_tick > MIN_TICK_TIME
            {
                let derived_accel = (new_up_speed - old_up_speed) / time_tick;
                if derived_accel.abs() > SMALL_NUMBER {
                    let time_to_apex = -old_up_speed / derived_accel;
                    const APEX_TIME_MINIMUM: f32 = 0.0001;
                    if (APEX_TIME_MINIMUM..time_tick).contains(&time_to_apex) {
                        let apex_velocity = old_velocity + gravity * time_to_apex;
                        self.state.vel.0 = apex_velocity - *up_dir * apex_velocity.dot(*up_dir);
                        remaining += time_tick - time_to_apex;
                        time_tick = time_to_apex;
                        self.iterations -= 1;
                        self.apex_attempts += 1;
                    }
                }
            }
            if old_up_speed > 0.0 && self.state.vel.0.dot(*up_dir) <= 0.0 {
                self.outcomes.push(Outcome::JumpApex {
                    pos: self.state.pos.0,
                });
                self.state.jump_hold_time = None;
            }

            // Midpoint integration of the position
            let mut adjusted = (old_velocity + self.state.vel.0) * 0.5 * time_tick;
            let hit = self.move_capsule(adjusted);

            if self.world.fluid_at(self.state.pos.0).is_some() {
                let covered = hit.map_or(1.0, |h| h.fraction);
                remaining += time_tick * (1.0 - covered);
                self.set_move_mode(MoveMode::Swimming);
                self.start_swimming(input, old_pos, old_velocity, time_tick, remaining);
                return;
            }

            let Some(hit) = hit.filter(|h| h.blocking) else {
                continue;
            };

            let mut last_move_time_slice = time_tick;
            let mut sub_time_remaining = time_tick * (1.0 - hit.fraction);

            if self.is_valid_landing_spot(self.state.pos.0, &hit) {
                remaining += sub_time_remaining;
                self.process_landed(&hit, input, remaining);
                return;
            }

            // Deflect using the final velocity so the full gravity effect
            // carries into the slide
            adjusted = self.state.vel.0 * time_tick;

            if !hit.start_penetrating && self.should_check_for_valid_landing_spot(&hit) {
                // Edge clip; a downward probe may still find floor
                let pos = self.state.pos.0;
                let gravity_dir = self.gravity_dir();
                let floor = self.scanner().find_floor(
                    pos,
                    up,
                    gravity_dir,
                    false,
                    self.state.capsule,
                    None,
                );
                if floor.is_walkable_floor() {
                    if let Some(floor_hit) = floor.hit {
                        if self.is_valid_landing_spot(pos, &floor_hit) {
                            remaining += sub_time_remaining;
                            self.state.floor = floor;
                            self.process_landed(&floor_hit, input, remaining);
                            return;
                        }
                    }
                }
            }

            self.handle_impact(&hit);
            if self.state.mode != MoveMode::Falling {
                return;
            }

            if has_air_control {
                let limited = self.limit_air_control(air_control_accel, &hit) * last_move_time_slice;
                adjusted = (velocity_no_air + limited) * last_move_time_slice;
            }

            let old_hit_normal = hit.normal;
            let old_hit_impact_normal = hit.impact_normal;
            let mut delta = self.compute_slide_vector(adjusted, 1.0 - hit.fraction, old_hit_normal);

            if sub_time_remaining > KINDA_SMALL_NUMBER && !self.state.just_teleported {
                self.state.vel.0 = delta / sub_time_remaining;
            }

            if sub_time_remaining > KINDA_SMALL_NUMBER && delta.dot(adjusted) > 0.0 {
                let second = self.move_capsule(delta);
                let Some(second) = second.filter(|h| h.blocking) else {
                    continue;
                };
                last_move_time_slice = sub_time_remaining;
                sub_time_remaining *= 1.0 - second.fraction;

                if self.is_valid_landing_spot(self.state.pos.0, &second) {
                    remaining += sub_time_remaining;
                    self.process_landed(&second, input, remaining);
                    return;
                }
                self.handle_impact(&second);
                if self.state.mode != MoveMode::Falling {
                    return;
                }

                // Ignore air control for the new deflection when the
                // second wall is steep; it would climb the wall
                if has_air_control && second.normal.dot(*up) > VERTICAL_SLOPE_NORMAL {
                    delta = velocity_no_air * last_move_time_slice;
                }
                self.two_wall_adjust(&mut delta, &second, old_hit_normal, adjusted);
                if has_air_control {
                    let limited =
                        self.limit_air_control(air_control_accel, &second) * sub_time_remaining;
                    if limited.dot(*old_hit_normal) > 0.0 {
                        delta += limited * sub_time_remaining;
                    }
                }
                if sub_time_remaining > KINDA_SMALL_NUMBER && !self.state.just_teleported {
                    self.state.vel.0 = delta / sub_time_remaining;
                }

                // Straddling two slopes neither of which can be stood on
                let ditch = old_hit_impact_normal.dot(*up) > 0.0
                    && second.impact_normal.dot(*up) > 0.0
                    && delta.dot(*up).abs() <= KINDA_SMALL_NUMBER
                    && second.impact_normal.dot(*old_hit_impact_normal) < 0.999;

                let third = self.move_capsule(delta);
                let stuck = third.is_some_and(|h| h.fraction == 0.0);
                if stuck {
                    // Side-step out of the crease, deterministically
                    // along the walls rather than by a random nudge
                    let combined = *old_hit_normal + *second.impact_normal;
                    let side = combined - *up * combined.dot(*up);
                    let side = Dir::from_unnormalized(side)
                        .or_else(|| {
                            Dir::from_unnormalized(old_hit_normal.cross(*up))
                        })
                        .map(|d| *d * self.state.capsule.radius * 0.25)
                        .unwrap_or_default();
                    self.move_capsule(side);
                }

                let landing_hit = third.unwrap_or(second);
                if ditch || stuck || self.is_valid_landing_spot(self.state.pos.0, &landing_hit) {
                    self.process_landed(&landing_hit, input, 0.0);
                    return;
                }
            }
        }
    }

    /// Lateral part of the input acceleration, boosted at low speeds when
    /// air control boosting is configured
    fn falling_lateral_acceleration(&mut self) -> Vec3<f32> {
        let up = self.state.up();
        let lateral = self.state.acc - *up * self.state.acc.dot(*up);
        let mut air_control = self.config.air_control;
        if air_control != 0.0 && self.config.air_control_boost_multiplier > 0.0 {
            let lateral_vel = self.state.vel.0 - *up * self.state.vel.0.dot(*up);
            let threshold = self.config.air_control_boost_velocity_threshold;
            if lateral_vel.magnitude_squared() < threshold * threshold {
                air_control = (self.config.air_control_boost_multiplier * air_control).min(1.0);
            }
        }
        clamp_to_max(lateral * air_control, self.config.max_acceleration)
    }

    /// Restrict air control against steep surfaces so input cannot push
    /// the capsule up a wall
    fn limit_air_control(&mut self, air_control_accel: Vec3<f32>, hit: &Hit) -> Vec3<f32> {
        let up = self.state.up();
        if hit.blocking && !hit.start_penetrating && hit.normal.dot(*up) > VERTICAL_SLOPE_NORMAL {
            if air_control_accel.dot(*hit.normal) < 0.0 {
                // Parallel to the wall is fine, into it is not
                let lateral_normal = *hit.normal - *up * hit.normal.dot(*up);
                if let Some(lateral_normal) = Dir::from_unnormalized(lateral_normal) {
                    return air_control_accel.projected(&Plane::from(lateral_normal));
                }
            }
        } else if hit.start_penetrating {
            // Only allow acceleration that helps escape the penetration
            return if air_control_accel.dot(*hit.normal) > 0.0 {
                air_control_accel
            } else {
                Vec3::zero()
            };
        }
        air_control_accel
    }
}
