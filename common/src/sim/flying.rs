//! Free flight
//!
//! Flying ignores gravity entirely; velocity is steered directly with
//! fluid-style friction and deflects off anything blocking.

use super::Simulator;
use crate::{
    consts::{MIN_TICK_TIME, SWIM_FRICTION_DEPTH_SCALE},
    gravity::GravitySampler,
    state::MoveInput,
    world::{CollisionWorld, Fluid},
};

impl<W: CollisionWorld, S: GravitySampler> Simulator<'_, W, S> {
    pub(crate) fn phys_flying(&mut self, input: &MoveInput, dt: f32) {
        if dt < MIN_TICK_TIME {
            return;
        }
        match input.root_motion {
            None => {
                let fluid_friction = self
                    .world
                    .fluid_at(self.state.pos.0)
                    .unwrap_or(Fluid {
                        friction: 0.3,
                        terminal_velocity: self.config.terminal_velocity,
                    })
                    .friction;
                let friction = SWIM_FRICTION_DEPTH_SCALE * fluid_friction;
                self.calc_velocity(dt, friction, true, self.max_braking_deceleration());
            },
            Some(rm) if rm.additive => self.state.vel.0 += rm.vel,
            Some(rm) => self.state.vel.0 = rm.vel,
        }

        self.iterations += 1;
        let old_pos = self.state.pos.0;
        self.state.just_teleported = false;

        let adjusted = self.state.vel.0 * dt;
        let hit = self.move_capsule(adjusted);
        if let Some(hit) = hit.filter(|h| h.blocking) {
            self.handle_impact(&hit);
            self.slide_along_surface(adjusted, 1.0 - hit.fraction, hit.normal);
        }

        if !self.state.just_teleported && input.root_motion.is_none() {
            self.state.vel.0 = (self.state.pos.0 - old_pos) / dt;
        }
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
        world::{Capsule, PlaneWorld},
    };
    use approx::assert_relative_eq;
    use vek::*;

    #[test]
    fn flying_ignores_gravity() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut state = MovementState::new(Vec3::new(0.0, 0.0, 500.0), Capsule::new(34.0, 88.0));
        state.mode = MoveMode::Flying;
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        let mut sim =
            Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        let idle = MoveInput::default();
        for _ in 0..60 {
            sim.tick(&idle, 1.0 / 60.0);
        }
        assert_eq!(state.mode, MoveMode::Flying);
        assert_relative_eq!(state.pos.0.z, 500.0, epsilon = 1e-3);
    }

    #[test]
    fn flying_slides_along_floor() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut state = MovementState::new(Vec3::new(0.0, 0.0, 200.0), Capsule::new(34.0, 88.0));
        state.mode = MoveMode::Flying;
        let mut gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        let mut sim =
            Simulator::new(&world, &(), &config, &mut state, &mut gravity, &mut outcomes);
        // Diving at the floor at 45 degrees
        let dive = MoveInput {
            acc: Vec3::new(1448.0, 0.0, -1448.0),
            ..Default::default()
        };
        for _ in 0..240 {
            sim.tick(&dive, 1.0 / 60.0);
        }
        assert_eq!(state.mode, MoveMode::Flying);
        // Stopped at the floor but kept moving laterally
        assert!(state.pos.0.z >= 88.0 - 0.5);
        assert!(state.pos.0.x > 500.0);
    }
}
