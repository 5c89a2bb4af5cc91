//! Motion integration
//!
//! One [`Simulator`] advances a [`MovementState`] through a collision
//! backend for a single tick, dispatching to the integrator of the active
//! movement mode. Integrators subdivide the tick, move the capsule with
//! sweeps, and hand control to one another when the mode changes mid-tick
//! (walking off a ledge, landing, entering water).

mod falling;
mod flying;
mod swimming;
mod walking;

use crate::{
    config::MoveConfig,
    consts::{
        BRAKE_TO_STOP_VELOCITY, KINDA_SMALL_NUMBER, MIN_TICK_TIME, PENETRATION_PULLBACK_DISTANCE,
        SMALL_NUMBER,
    },
    floor::FloorScanner,
    gravity::{GravityProvider, GravitySampler},
    mode::MoveMode,
    ori::{rotate_velocity, RotatePivot},
    outcome::Outcome,
    state::{BaseRef, MoveInput, MovementState},
    util::{Dir, Projection},
    world::{capsule_rot, CollisionWorld, Hit, SweepShape},
};
use tracing::debug;
use vek::*;

/// Advances one agent through one tick
pub struct Simulator<'a, W, S> {
    pub(crate) world: &'a W,
    pub(crate) sampler: &'a S,
    pub(crate) config: &'a MoveConfig,
    pub(crate) state: &'a mut MovementState,
    pub(crate) gravity: &'a mut GravityProvider,
    pub(crate) outcomes: &'a mut Vec<Outcome>,
    pub(crate) iterations: u32,
    pub(crate) apex_attempts: u32,
    unwalkable_reported: bool,
}

impl<'a, W: CollisionWorld, S: GravitySampler> Simulator<'a, W, S> {
    pub fn new(
        world: &'a W,
        sampler: &'a S,
        config: &'a MoveConfig,
        state: &'a mut MovementState,
        gravity: &'a mut GravityProvider,
        outcomes: &'a mut Vec<Outcome>,
    ) -> Self {
        Self {
            world,
            sampler,
            config,
            state,
            gravity,
            outcomes,
            iterations: 0,
            apex_attempts: 0,
            unwalkable_reported: false,
        }
    }

    /// Run one tick of `dt` seconds under `input`
    pub fn tick(&mut self, input: &MoveInput, dt: f32) {
        if dt < MIN_TICK_TIME {
            return;
        }
        self.iterations = 0;
        self.apex_attempts = 0;
        self.unwalkable_reported = false;
        self.state.just_teleported = false;

        let max_acc = self.config.max_acceleration;
        self.state.acc = clamp_to_max(input.acc, max_acc);

        self.update_crouch_state(input.crouch);

        if let Some(vel) = self.state.pending_launch.take() {
            self.state.vel.0 = vel;
            self.set_move_mode(MoveMode::Falling);
        }
        self.apply_accumulated_forces(dt);

        if input.jump {
            self.do_jump();
        } else if self.state.jump_hold_time.is_some() && self.state.mode == MoveMode::Falling {
            // Jump released mid-air
            self.state.jump_hold_time = None;
        }

        self.update_orientation();

        self.start_physics(input, dt);

        if self.config.align_gravity_to_base && self.state.mode.is_grounded() {
            if let Some((normal, base)) = self
                .state
                .floor
                .hit
                .filter(|_| self.state.floor.is_walkable_floor())
                .map(|hit| (hit.impact_normal, hit.surface))
            {
                let source = self.world.gravity_source_of(base);
                self.gravity.align_to_base(normal, source);
            }
        }
        if self.gravity.take_update().is_some() {
            self.outcomes.push(Outcome::GravityChanged);
        }
    }

    /// Dispatch to the integrator of the current mode; integrators call
    /// back into this when the mode changes with time left in the tick
    pub(crate) fn start_physics(&mut self, input: &MoveInput, dt: f32) {
        if dt < MIN_TICK_TIME || self.iterations >= self.config.max_simulation_iterations {
            return;
        }
        match self.state.mode {
            MoveMode::None | MoveMode::Custom(_) => {},
            MoveMode::Walking => self.phys_walking(input, dt),
            MoveMode::Falling => self.phys_falling(input, dt),
            MoveMode::Swimming => self.phys_swimming(input, dt),
            MoveMode::Flying => self.phys_flying(input, dt),
        }
    }

    /// Length of the next substep, halving large remainders until the
    /// iteration budget forces one final full-length step
    pub(crate) fn simulation_time_step(&self, remaining: f32) -> f32 {
        let mut step = remaining;
        if step > self.config.max_simulation_time_step
            && self.iterations < self.config.max_simulation_iterations
        {
            step = (remaining * 0.5).min(self.config.max_simulation_time_step);
        }
        step.max(MIN_TICK_TIME)
    }

    pub(crate) fn scanner(&self) -> FloorScanner<'a, W> {
        FloorScanner {
            world: self.world,
            config: self.config,
        }
    }

    pub(crate) fn gravity_dir(&mut self) -> Dir {
        self.gravity.direction_or_down(self.state.pos.0, self.sampler)
    }

    pub(crate) fn gravity_accel(&mut self) -> Vec3<f32> {
        self.gravity.gravity(self.state.pos.0, self.sampler)
    }

    // --- movement primitives ---

    /// Sweep the capsule along `delta`, stopping at the first blocking
    /// hit; resolves initial penetration and retries once
    pub(crate) fn move_capsule(&mut self, delta: Vec3<f32>) -> Option<Hit> {
        let shape = SweepShape::Capsule(self.state.capsule);
        let rot = capsule_rot(self.state.up());
        let start = self.state.pos.0;
        match self.world.sweep(shape, rot, start, start + delta) {
            None => {
                self.state.pos.0 = start + delta;
                None
            },
            Some(hit) if hit.start_penetrating => {
                let adjustment =
                    *hit.normal * (hit.penetration_depth + PENETRATION_PULLBACK_DISTANCE);
                self.resolve_penetration(adjustment);
                let start = self.state.pos.0;
                match self.world.sweep(shape, rot, start, start + delta) {
                    None => {
                        self.state.pos.0 = start + delta;
                        None
                    },
                    Some(retry) if retry.start_penetrating => {
                        debug!("Capsule still penetrating after adjustment");
                        Some(retry)
                    },
                    Some(retry) => {
                        self.state.pos.0 = start + delta * retry.fraction;
                        Some(retry)
                    },
                }
            },
            Some(hit) => {
                self.state.pos.0 = start + delta * hit.fraction;
                Some(hit)
            },
        }
    }

    /// Nudge the capsule out of geometry along `adjustment`
    pub(crate) fn resolve_penetration(&mut self, adjustment: Vec3<f32>) {
        let max_dist = self.config.max_depenetration_speed * self.config.max_simulation_time_step;
        let adjustment = clamp_to_max(adjustment, max_dist);
        let shape = SweepShape::Capsule(self.state.capsule);
        let rot = capsule_rot(self.state.up());
        let target = self.state.pos.0 + adjustment;
        // Inflated overlap test; borderline spots go through the sweep
        let mut inflated = self.state.capsule;
        inflated.radius += crate::consts::PENETRATION_OVERLAP_INFLATION;
        if !self
            .world
            .overlaps(SweepShape::Capsule(inflated), rot, target)
        {
            self.state.pos.0 = target;
        } else if let Some(hit) = self.world.sweep(shape, rot, self.state.pos.0, target) {
            if hit.start_penetrating {
                // The escape sweep necessarily begins inside the surface
                // being escaped; an initial overlap must not block the
                // adjustment or the capsule stays wedged
                self.state.pos.0 = target;
            } else {
                self.state.pos.0 += adjustment * hit.fraction;
            }
        } else {
            self.state.pos.0 = target;
        }
    }

    /// Report an unwalkable blocking contact, once per tick
    pub(crate) fn handle_impact(&mut self, hit: &Hit) {
        let up = self.state.up();
        let gravity_dir = self.gravity_dir();
        let falling = self.state.mode.is_airborne();
        if !self.unwalkable_reported && !self.scanner().is_walkable(hit, up, gravity_dir, falling)
        {
            self.unwalkable_reported = true;
            self.outcomes.push(Outcome::UnwalkableHit { hit: *hit });
        }
    }

    /// Move along a blocking surface, deflecting off a second wall if one
    /// is struck; returns the portion of the slide that was applied
    pub(crate) fn slide_along_surface(&mut self, delta: Vec3<f32>, time: f32, normal: Dir) -> f32 {
        let up = self.state.up();
        let mut normal = normal;

        if self.state.mode.is_grounded() {
            let normal_up = normal.dot(*up);
            if normal_up > 0.0 {
                // Don't push up an unwalkable surface
                let pseudo_hit = self.pseudo_hit(normal);
                let gravity_dir = self.gravity_dir();
                if !self
                    .scanner()
                    .is_walkable(&pseudo_hit, up, gravity_dir, false)
                {
                    if let Some(levelled) = Dir::from_unnormalized(*normal - *up * normal_up) {
                        normal = levelled;
                    }
                }
            } else if normal_up < -KINDA_SMALL_NUMBER {
                // Don't push down into the floor when the impact is on
                // the upper portion of the capsule
                if self.state.floor.floor_dist < crate::consts::MIN_FLOOR_DIST
                    && self.state.floor.blocking_hit
                {
                    if let Some(floor_hit) = &self.state.floor.hit {
                        let floor_normal = floor_hit.normal;
                        let opposed = delta.dot(*floor_normal) < 0.0
                            && floor_normal.dot(*up) < 1.0 - SMALL_NUMBER;
                        if opposed {
                            normal = floor_normal;
                        }
                        let lateral = *normal - *up * normal.dot(*up);
                        if let Some(levelled) = Dir::from_unnormalized(lateral) {
                            normal = levelled;
                        }
                    }
                }
            }
        }

        let slide_delta = self.compute_slide_vector(delta, time, normal);
        let mut percent_applied = 0.0;
        if slide_delta.dot(delta) > 0.0 {
            let hit = self.move_capsule(slide_delta);
            percent_applied = hit.map_or(1.0, |h| h.fraction);
            if let Some(hit) = hit.filter(|h| h.blocking && !h.start_penetrating) {
                self.handle_impact(&hit);
                let mut adjusted = slide_delta;
                self.two_wall_adjust(&mut adjusted, &hit, normal, slide_delta);
                if adjusted.magnitude_squared() > SMALL_NUMBER && adjusted.dot(slide_delta) > 0.0 {
                    let second = self.move_capsule(adjusted);
                    let second_fraction = second.map_or(1.0, |h| h.fraction);
                    percent_applied += (1.0 - percent_applied) * second_fraction;
                }
            }
        }
        percent_applied.clamp(0.0, 1.0)
    }

    /// Deflect `delta` after hitting a second wall mid-slide
    pub(crate) fn two_wall_adjust(
        &mut self,
        delta: &mut Vec3<f32>,
        hit: &Hit,
        old_hit_normal: Dir,
        original_delta: Vec3<f32>,
    ) {
        let hit_normal = hit.normal;
        let desired = *delta;

        if old_hit_normal.dot(*hit_normal) <= 0.0 {
            // Corner of 90 degrees or less; slide along the crease
            let crease = hit_normal.cross(*old_hit_normal);
            match crease.try_normalized() {
                Some(crease) => {
                    *delta = crease * desired.dot(crease) * (1.0 - hit.fraction);
                    if desired.dot(*delta) < 0.0 {
                        *delta = -*delta;
                    }
                },
                None => *delta = Vec3::zero(),
            }
        } else {
            *delta = self.compute_slide_vector(desired, 1.0 - hit.fraction, hit_normal);
            if delta.dot(desired) <= 0.0 {
                *delta = Vec3::zero();
            } else if (hit_normal.dot(*old_hit_normal) - 1.0).abs() < KINDA_SMALL_NUMBER {
                // Hit the same wall again, nudge away from it
                *delta += *hit_normal * 0.01;
            }
        }

        if self.state.mode.is_grounded() {
            let up = self.state.up();
            let delta_up = delta.dot(*up);
            if delta_up > 0.0 {
                let pseudo_hit = self.pseudo_hit(hit.impact_normal);
                let gravity_dir = self.gravity_dir();
                let walkable = self
                    .scanner()
                    .is_walkable(&pseudo_hit, up, gravity_dir, false);
                let normal_up = hit.normal.dot(*up);
                if walkable && normal_up > KINDA_SMALL_NUMBER {
                    // Maintain horizontal speed up the new walkable ramp
                    let time = 1.0 - hit.fraction;
                    let scaled = delta
                        .try_normalized()
                        .map_or(Vec3::zero(), |d| d * original_delta.magnitude());
                    let lateral = original_delta - *up * original_delta.dot(*up);
                    let mut result = (lateral + *up * (scaled.dot(*up) / normal_up)) * time;
                    let result_up = result.dot(*up);
                    if result_up > self.config.max_step_height {
                        // Rather lose horizontal movement than go too high
                        result *= self.config.max_step_height / result_up;
                    }
                    *delta = result;
                } else {
                    *delta -= *up * delta_up;
                }
            } else if delta_up < 0.0 {
                // Don't push down into the floor
                if self.state.floor.floor_dist < crate::consts::MIN_FLOOR_DIST
                    && self.state.floor.blocking_hit
                {
                    *delta -= *up * delta_up;
                }
            }
        }
    }

    /// Wrap a bare normal in a hit for walkability queries against
    /// already-known contact data
    pub(crate) fn pseudo_hit(&self, normal: Dir) -> Hit {
        Hit {
            blocking: true,
            start_penetrating: false,
            fraction: 0.0,
            location: self.state.pos.0,
            normal,
            impact_normal: normal,
            impact_point: self.state.bottom_point(),
            penetration_depth: 0.0,
            surface: crate::world::SurfaceId(u64::MAX),
        }
    }

    // --- velocity ---

    pub(crate) fn max_speed(&self) -> f32 {
        match self.state.mode {
            MoveMode::Walking => {
                if self.state.crouching {
                    self.config.max_walk_speed_crouched
                } else {
                    self.config.max_walk_speed
                }
            },
            MoveMode::Falling => self.config.max_walk_speed,
            MoveMode::Swimming => self.config.max_swim_speed,
            MoveMode::Flying => self.config.max_fly_speed,
            MoveMode::None | MoveMode::Custom(_) => 0.0,
        }
    }

    pub(crate) fn max_braking_deceleration(&self) -> f32 {
        match self.state.mode {
            MoveMode::Walking => self.config.braking_deceleration_walking,
            MoveMode::Falling => self.config.braking_deceleration_falling,
            MoveMode::Swimming => self.config.braking_deceleration_swimming,
            MoveMode::Flying => self.config.braking_deceleration_flying,
            MoveMode::None | MoveMode::Custom(_) => 0.0,
        }
    }

    /// Friction, acceleration and speed-clamp update of velocity for one
    /// substep
    pub(crate) fn calc_velocity(&mut self, dt: f32, friction: f32, fluid: bool, braking: f32) {
        let acc = self.state.acc;
        let max_speed = self.max_speed();
        let zero_acc = acc.magnitude_squared() <= SMALL_NUMBER;
        let over_max = self.state.vel.0.magnitude_squared() > max_speed * max_speed;

        if zero_acc || over_max {
            let old_vel = self.state.vel.0;
            self.apply_velocity_braking(dt, friction, braking);
            if over_max
                && self.state.vel.0.magnitude_squared() < max_speed * max_speed
                && acc.dot(old_vel) > 0.0
            {
                self.state.vel.0 = old_vel.try_normalized().map_or(Vec3::zero(), |d| d * max_speed);
            }
        } else {
            // Friction affects the ability to change direction
            let acc_dir = acc.normalized();
            let speed = self.state.vel.0.magnitude();
            self.state.vel.0 -=
                (self.state.vel.0 - acc_dir * speed) * (dt * friction).min(1.0);
        }

        if fluid {
            self.state.vel.0 *= 1.0 - (friction * dt).min(1.0);
        }

        if !zero_acc {
            let new_max = if self.state.vel.0.magnitude_squared() > max_speed * max_speed {
                self.state.vel.0.magnitude()
            } else {
                max_speed
            };
            self.state.vel.0 += acc * dt;
            self.state.vel.0 = clamp_to_max(self.state.vel.0, new_max);
        }
    }

    fn apply_velocity_braking(&mut self, dt: f32, friction: f32, braking_deceleration: f32) {
        if self.state.vel.0 == Vec3::zero() || dt < MIN_TICK_TIME {
            return;
        }
        let friction = (friction * self.config.braking_friction_factor.max(0.0)).max(0.0);
        let braking = braking_deceleration.max(0.0);
        if friction == 0.0 && braking == 0.0 {
            return;
        }

        let old_vel = self.state.vel.0;
        let rev_accel = old_vel
            .try_normalized()
            .map_or(Vec3::zero(), |d| d * -braking);
        // Subdivide braking for consistency across frame rates
        let max_time_step = 1.0 / 33.0;
        let mut remaining = dt;
        while remaining >= MIN_TICK_TIME {
            let step = if remaining > max_time_step && friction > 0.0 {
                (remaining * 0.5).min(max_time_step)
            } else {
                remaining
            };
            remaining -= step;
            self.state.vel.0 += (self.state.vel.0 * -friction + rev_accel) * step;
            // Don't reverse direction
            if self.state.vel.0.dot(old_vel) <= 0.0 {
                self.state.vel.0 = Vec3::zero();
                return;
            }
        }

        let speed_sq = self.state.vel.0.magnitude_squared();
        if speed_sq <= KINDA_SMALL_NUMBER
            || (braking > 0.0 && speed_sq <= BRAKE_TO_STOP_VELOCITY * BRAKE_TO_STOP_VELOCITY)
        {
            self.state.vel.0 = Vec3::zero();
        }
    }

    /// Gravity integration with a terminal velocity clamp along the
    /// gravity direction
    pub(crate) fn new_fall_velocity(
        &self,
        vel: Vec3<f32>,
        gravity: Vec3<f32>,
        dt: f32,
    ) -> Vec3<f32> {
        if dt <= 0.0 {
            return vel;
        }
        let mut result = vel + gravity * dt;
        let terminal = self
            .world
            .fluid_at(self.state.pos.0)
            .map_or(self.config.terminal_velocity, |f| f.terminal_velocity)
            .abs();
        if result.magnitude_squared() > terminal * terminal {
            if let Some(gravity_dir) = Dir::from_unnormalized(gravity) {
                if result.dot(*gravity_dir) > terminal {
                    result = result - result.projected(&gravity_dir) + *gravity_dir * terminal;
                }
            }
        }
        result
    }

    /// Remove (or redirect) the velocity component along the up axis so
    /// ground movement stays in the floor plane
    pub(crate) fn maintain_horizontal_ground_velocity(&mut self) {
        let up = self.state.up();
        let vel = self.state.vel.0;
        let up_comp = vel.dot(*up);
        if up_comp != 0.0 {
            let lateral = vel - *up * up_comp;
            self.state.vel.0 = if self.config.maintain_horizontal_ground_velocity {
                lateral
            } else {
                // Rescale so speed along the slope is preserved
                lateral
                    .try_normalized()
                    .map_or(Vec3::zero(), |d| d * vel.magnitude())
            };
        }
    }

    // --- forces, jumping, crouching ---

    fn apply_accumulated_forces(&mut self, dt: f32) {
        let impulse = std::mem::replace(&mut self.state.pending_impulse, Vec3::zero());
        let force = std::mem::replace(&mut self.state.pending_force, Vec3::zero());
        if impulse == Vec3::zero() && force == Vec3::zero() {
            return;
        }
        let up = self.state.up();
        let gravity = self.gravity_accel();
        if self.state.mode.is_grounded()
            && (impulse.dot(*up) + force.dot(*up) * dt + gravity.dot(*up) * dt) > SMALL_NUMBER
        {
            // Momentum overcomes gravity, leave the floor
            self.set_move_mode(MoveMode::Falling);
        }
        self.state.vel.0 += impulse + force * dt;
    }

    /// Jump along the up axis; only possible from the ground
    pub fn do_jump(&mut self) -> bool {
        if !self.state.mode.is_grounded() {
            return false;
        }
        let up = self.state.up();
        let vel_up = self.state.vel.0.dot(*up);
        self.state.vel.0 += *up * (self.config.jump_velocity.max(vel_up) - vel_up);
        self.state.jump_hold_time = Some(0.0);
        self.set_move_mode(MoveMode::Falling);
        true
    }

    /// Leap away from a base the agent should not stand on
    pub fn jump_off(&mut self, away_from: Vec3<f32>) {
        let up = self.state.up();
        let max_speed = self.max_speed() * 0.85;
        let dir = self.state.pos.0 - away_from;
        let lateral = dir - *up * dir.dot(*up);
        if let Some(dir) = Dir::from_unnormalized(lateral) {
            self.state.vel.0 += *dir * max_speed;
        }
        let lateral_vel = self.state.vel.0 - *up * self.state.vel.0.dot(*up);
        let clamped = clamp_to_max(lateral_vel, max_speed);
        self.state.vel.0 = clamped + *up * self.config.jump_velocity;
        self.set_move_mode(MoveMode::Falling);
    }

    fn update_crouch_state(&mut self, wants_crouch: bool) {
        if wants_crouch == self.state.crouching {
            return;
        }
        let up = self.state.up();
        if wants_crouch {
            let old_half = self.state.capsule.half_height;
            let new_half = self
                .config
                .crouched_half_height
                .max(self.state.capsule.radius);
            if new_half >= old_half {
                return;
            }
            // Keep the feet planted
            self.state.capsule.half_height = new_half;
            self.state.pos.0 -= *up * (old_half - new_half);
            self.state.crouching = true;
            self.outcomes.push(Outcome::StartCrouch {
                half_height_delta: old_half - new_half,
            });
        } else {
            let old_half = self.state.capsule.half_height;
            let new_half = self.state.standing_half_height;
            let delta = new_half - old_half;
            let mut expanded = self.state.capsule;
            expanded.half_height = new_half;
            let new_pos = self.state.pos.0 + *up * delta;
            if self
                .world
                .overlaps(SweepShape::Capsule(expanded), capsule_rot(up), new_pos)
            {
                // No headroom, stay crouched
                return;
            }
            self.state.capsule = expanded;
            self.state.pos.0 = new_pos;
            self.state.crouching = false;
            self.outcomes.push(Outcome::EndCrouch {
                half_height_delta: delta,
            });
        }
    }

    // --- orientation ---

    fn desired_up(&mut self) -> Dir {
        if self.config.align_to_floor
            && self.state.mode.is_grounded()
            && self.state.floor.is_walkable_floor()
        {
            if let Some(hit) = &self.state.floor.hit {
                return hit.impact_normal;
            }
        }
        if self.config.align_to_gravity {
            return -self.gravity.direction_or_down(self.state.pos.0, self.sampler);
        }
        self.state.up()
    }

    /// Re-align the capsule up axis with the floor or gravity
    fn update_orientation(&mut self) {
        let desired = self.desired_up();
        let current = self.state.up();
        if current.coincident(desired, self.config.threshold_parallel_cos()) {
            return;
        }
        let new_ori = self.state.ori.with_up(desired);
        let new_up = new_ori.up();

        match self.config.rotate_pivot {
            RotatePivot::BottomSphere => {
                // Pivot on the bottom sphere center so the feet stay put
                let seg = self.state.capsule.segment_half_len();
                let bottom_sphere = self.state.pos.0 - *current * seg;
                self.state.pos.0 = bottom_sphere + *new_up * seg;
            },
            RotatePivot::Center => {
                // The capsule swings in place; refuse the rotation if it
                // would start inside geometry
                if self.world.overlaps(
                    SweepShape::Capsule(self.state.capsule),
                    capsule_rot(new_up),
                    self.state.pos.0,
                ) {
                    return;
                }
            },
        }

        self.state.ori = new_ori;
        if self.config.rotate_velocity_with_up {
            self.state.vel.0 = rotate_velocity(self.state.vel.0, current, new_up);
        }
        self.outcomes.push(Outcome::UpAxisChanged {
            old: current,
            new: new_up,
        });
    }

    // --- mode transitions ---

    pub fn set_move_mode(&mut self, new: MoveMode) {
        if new == self.state.mode {
            return;
        }
        let old = self.state.mode;
        self.state.mode = new;
        self.on_movement_mode_changed(old);
        self.outcomes.push(Outcome::ModeChanged { old, new });
    }

    fn on_movement_mode_changed(&mut self, old: MoveMode) {
        match self.state.mode {
            MoveMode::Walking => {
                // Land on the floor below and level out
                self.maintain_horizontal_ground_velocity();
                let up = self.state.up();
                let gravity_dir = self.gravity_dir();
                let floor = self.scanner().find_floor(
                    self.state.pos.0,
                    up,
                    gravity_dir,
                    false,
                    self.state.capsule,
                    None,
                );
                self.state.floor = floor;
                self.update_base_from_floor();
                self.state.jump_hold_time = None;
            },
            MoveMode::Falling => {
                if old.is_grounded() && self.config.impart_base_velocity {
                    if let Some(base) = self.state.base {
                        let base_vel = self.world.base_velocity(base.surface);
                        self.state.vel.0 += base_vel;
                    }
                }
                self.state.base = None;
            },
            MoveMode::None => {
                self.state.vel.0 = Vec3::zero();
                self.state.acc = Vec3::zero();
                self.state.pending_impulse = Vec3::zero();
                self.state.pending_force = Vec3::zero();
                self.state.floor.clear();
                self.state.base = None;
            },
            MoveMode::Swimming | MoveMode::Flying => {
                self.state.floor.clear();
                self.state.base = None;
                self.state.jump_hold_time = None;
            },
            MoveMode::Custom(_) => {},
        }
    }

    /// Apply a replicated movement mode without running local transition
    /// side effects twice
    pub fn apply_replicated_mode(&mut self, mode: MoveMode) {
        if self.state.mode != mode {
            let old = self.state.mode;
            self.state.mode = mode;
            if !mode.is_grounded() {
                self.state.floor.clear();
                self.state.base = None;
            }
            self.outcomes.push(Outcome::ModeChanged { old, new: mode });
        }
    }

    pub(crate) fn update_base_from_floor(&mut self) {
        self.state.base = self
            .state
            .floor
            .hit
            .filter(|_| self.state.floor.is_walkable_floor())
            .map(|hit| BaseRef {
                surface: hit.surface,
            });
    }

    /// Landing handoff: pick the post-landing mode and continue the tick
    pub(crate) fn process_landed(&mut self, hit: &Hit, input: &MoveInput, remaining: f32) {
        self.outcomes.push(Outcome::Landed {
            pos: self.state.pos.0,
            vel: self.state.vel.0,
            surface: hit.surface,
        });
        if self.world.fluid_at(self.state.pos.0).is_some() {
            self.set_move_mode(MoveMode::Swimming);
        } else {
            self.set_move_mode(MoveMode::Walking);
        }
        self.start_physics(input, remaining);
    }

    /// Leave the ground, refunding the unmoved portion of the substep
    pub(crate) fn start_falling(
        &mut self,
        input: &MoveInput,
        mut remaining: f32,
        time_tick: f32,
        delta: Vec3<f32>,
        sub_loc: Vec3<f32>,
    ) {
        let desired_dist = delta.magnitude();
        if desired_dist < KINDA_SMALL_NUMBER {
            remaining = 0.0;
        } else {
            let actual_dist = (self.state.pos.0 - sub_loc).magnitude();
            remaining += time_tick * (1.0 - (actual_dist / desired_dist).min(1.0));
        }
        if self.state.mode.is_grounded() {
            self.set_move_mode(MoveMode::Falling);
        }
        self.start_physics(input, remaining);
    }
}

/// Clamp a vector's magnitude
pub(crate) fn clamp_to_max(v: Vec3<f32>, max: f32) -> Vec3<f32> {
    let mag_sq = v.magnitude_squared();
    if max <= 0.0 {
        Vec3::zero()
    } else if mag_sq > max * max {
        v * (max / mag_sq.sqrt())
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Capsule, PlaneWorld};
    use approx::assert_relative_eq;

    fn setup(pos: Vec3<f32>) -> (MovementState, GravityProvider, Vec<Outcome>) {
        let state = MovementState::new(pos, Capsule::new(34.0, 88.0));
        let gravity = GravityProvider::new(980.0);
        (state, gravity, Vec::new())
    }

    #[test]
    fn walking_velocity_stays_in_floor_plane() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 90.0));
        let input = MoveInput {
            acc: Vec3::unit_x() * 2048.0,
            ..Default::default()
        };
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        for _ in 0..30 {
            sim.tick(&input, 1.0 / 60.0);
        }
        assert_eq!(state.mode, MoveMode::Walking);
        assert!(state.vel.0.x > 100.0);
        assert_relative_eq!(state.vel.0.dot(Vec3::unit_z()), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn braking_stops_below_threshold() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 90.0));
        state.vel.0 = Vec3::unit_x() * 300.0;
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        let idle = MoveInput::default();
        for _ in 0..120 {
            sim.tick(&idle, 1.0 / 60.0);
        }
        assert_eq!(state.vel.0, Vec3::zero());
    }

    #[test]
    fn jump_reaches_expected_apex_height() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 90.0));
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&MoveInput::default(), 1.0 / 60.0);
        assert_eq!(state.mode, MoveMode::Walking);
        let start_z = state.pos.0.z;

        let jump = MoveInput {
            jump: true,
            ..Default::default()
        };
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&jump, 1.0 / 60.0);
        assert_eq!(state.mode, MoveMode::Falling);

        let mut peak = start_z;
        let idle = MoveInput::default();
        for _ in 0..240 {
            let mut sim =
                Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
            sim.tick(&idle, 1.0 / 60.0);
            peak = peak.max(state.pos.0.z);
            if state.mode == MoveMode::Walking {
                break;
            }
        }
        // v^2 / 2g = 600^2 / (2 * 980)
        let expected = 600.0_f32 * 600.0 / (2.0 * 980.0);
        assert_relative_eq!(peak - start_z, expected, epsilon = expected * 0.02);
        assert_eq!(state.mode, MoveMode::Walking);
        assert!(outcomes.iter().any(|o| matches!(o, Outcome::JumpApex { .. })));
        assert!(outcomes.iter().any(|o| matches!(o, Outcome::Landed { .. })));
    }

    #[test]
    fn depenetration_moves_even_while_still_overlapping() {
        // Deep overlaps take several clamped adjustments to escape; each
        // one must make progress even though the escape sweep still
        // starts inside the floor
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 50.0));
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.resolve_penetration(Vec3::unit_z() * 38.125);
        let clamp = config.max_depenetration_speed * config.max_simulation_time_step;
        assert_relative_eq!(state.pos.0.z, 50.0 + clamp, epsilon = 1e-4);
    }

    #[test]
    fn impulse_overcoming_gravity_lifts_off() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 90.0));
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&MoveInput::default(), 1.0 / 60.0);
        state.add_impulse(Vec3::unit_z() * 500.0);
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&MoveInput::default(), 1.0 / 60.0);
        assert_eq!(state.mode, MoveMode::Falling);
        assert!(state.vel.0.z > 0.0);
    }

    #[test]
    fn none_mode_zeroes_motion() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 90.0));
        state.vel.0 = Vec3::unit_x() * 100.0;
        state.add_force(Vec3::unit_x() * 10.0);
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.set_move_mode(MoveMode::None);
        assert_eq!(state.vel.0, Vec3::zero());
        assert_eq!(state.pending_force, Vec3::zero());
        let pos = state.pos.0;
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(
            &MoveInput {
                acc: Vec3::unit_x() * 2048.0,
                ..Default::default()
            },
            1.0 / 60.0,
        );
        assert_eq!(state.pos.0, pos);
    }

    #[test]
    fn crouch_shrinks_and_restores_capsule() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let (mut state, mut gravity, mut outcomes) = setup(Vec3::new(0.0, 0.0, 90.0));
        let crouch = MoveInput {
            crouch: true,
            ..Default::default()
        };
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&crouch, 1.0 / 60.0);
        assert!(state.crouching);
        assert_relative_eq!(state.capsule.half_height, 40.0);
        let mut sim = Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        sim.tick(&MoveInput::default(), 1.0 / 60.0);
        assert!(!state.crouching);
        assert_relative_eq!(state.capsule.half_height, 88.0);
        assert!(outcomes.iter().any(|o| matches!(o, Outcome::StartCrouch { .. })));
        assert!(outcomes.iter().any(|o| matches!(o, Outcome::EndCrouch { .. })));
    }
}
