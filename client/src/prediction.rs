use common::{
    gravity::GravitySampler, CollisionWorld, FloorScanner, GravityProvider, MoveConfig, MoveInput,
    MoveMode, MovementState, Outcome, Simulator,
};
use common_net::{ClientMove, MoveAck, ServerCorrection};
use std::collections::VecDeque;
use tracing::{debug, warn};
use vek::*;

/// Moves kept for replay; at 60 Hz this covers several seconds of
/// round-trip time
const MAX_SAVED_MOVES: usize = 512;

/// A move that has been simulated locally but not yet acknowledged
#[derive(Copy, Clone, Debug)]
struct SavedMove {
    id: u64,
    dt: f32,
    input: MoveInput,
}

/// Records simulated moves and reconciles them with the server
#[derive(Debug, Default)]
pub struct Prediction {
    next_id: u64,
    saved: VecDeque<SavedMove>,
    /// Newest correction applied, so late-arriving older ones are ignored
    last_correction: u64,
}

impl Prediction {
    pub fn new() -> Self { Self::default() }

    pub fn pending_moves(&self) -> usize { self.saved.len() }

    /// Simulate one tick locally and produce the move to send
    #[allow(clippy::too_many_arguments)]
    pub fn predict<W: CollisionWorld, S: GravitySampler>(
        &mut self,
        world: &W,
        sampler: &S,
        config: &MoveConfig,
        state: &mut MovementState,
        gravity: &mut GravityProvider,
        outcomes: &mut Vec<Outcome>,
        input: MoveInput,
        dt: f32,
    ) -> ClientMove {
        let mut sim = Simulator::new(world, sampler, config, state, gravity, outcomes);
        sim.tick(&input, dt);

        let id = self.next_id;
        self.next_id += 1;
        self.saved.push_back(SavedMove { id, dt, input });
        while self.saved.len() > MAX_SAVED_MOVES {
            self.saved.pop_front();
        }

        let (pos, base) = match state.base {
            Some(base) => match world.base_transform(base.surface) {
                Some(transform) => (
                    (transform.inverted() * Vec4::from_point(state.pos.0)).xyz(),
                    Some(base),
                ),
                None => (state.pos.0, None),
            },
            None => (state.pos.0, None),
        };

        ClientMove {
            id,
            dt,
            input,
            pos,
            vel: state.vel.0,
            ori: state.ori,
            mode: state.mode.to_byte(),
            base,
        }
    }

    /// Drop remembered moves the server has accepted
    pub fn apply_ack(&mut self, ack: MoveAck) {
        while self.saved.front().is_some_and(|m| m.id <= ack.id) {
            self.saved.pop_front();
        }
    }

    /// Rewind to an authoritative state and replay the moves the server
    /// has not seen yet; returns false when the correction was discarded
    #[allow(clippy::too_many_arguments)]
    pub fn apply_correction<W: CollisionWorld, S: GravitySampler>(
        &mut self,
        world: &W,
        sampler: &S,
        config: &MoveConfig,
        state: &mut MovementState,
        gravity: &mut GravityProvider,
        outcomes: &mut Vec<Outcome>,
        correction: ServerCorrection,
    ) -> bool {
        if correction.id < self.last_correction {
            debug!(
                id = correction.id,
                newest = self.last_correction,
                "Discarding stale correction"
            );
            return false;
        }

        // Resolve the corrected position into world space
        let pos = match (correction.relative, correction.base) {
            (true, Some(base)) => match world.base_transform(base.surface) {
                Some(transform) => (transform * Vec4::from_point(correction.pos)).xyz(),
                None => {
                    // Without the base the relative position is garbage
                    warn!(
                        surface = base.surface.0,
                        "Correction against unknown base, waiting for an absolute one"
                    );
                    return false;
                },
            },
            (true, None) => {
                // A relative position with no base cannot be resolved
                warn!("Relative correction without a base, discarding");
                return false;
            },
            (false, _) => correction.pos,
        };
        if correction.base.is_some_and(|b| world.base_transform(b.surface).is_none()) {
            warn!(
                "Corrected base is unknown locally, movement may diverge until it replicates"
            );
        }
        self.last_correction = correction.id;

        state.teleport_to(pos);
        state.vel.0 = correction.vel;
        if let Some(ori) = correction.ori {
            state.ori = ori;
        }
        if let Some(rm) = correction.root_motion {
            // The packed montage rotation is authoritative over the
            // regular orientation sync
            state.ori = rm.rotation.into();
        }
        if let Some(gravity_config) = correction.gravity {
            gravity.apply_replicated(gravity_config);
        }
        state.base = correction.base;
        {
            let mut sim = Simulator::new(world, sampler, config, state, gravity, outcomes);
            sim.apply_replicated_mode(MoveMode::from_byte(correction.mode));
        }

        // The corrected state knows nothing about the local floor
        let scanner = FloorScanner { world, config };
        let up = state.up();
        let gravity_dir = gravity.direction_or_down(state.pos.0, sampler);
        if state.mode.is_grounded() {
            state.floor = scanner.find_floor(state.pos.0, up, gravity_dir, false, state.capsule, None);
        } else {
            state.floor.clear();
        }

        // Replay everything the server had not simulated when it sent
        // this correction
        while self.saved.front().is_some_and(|m| m.id <= correction.id) {
            self.saved.pop_front();
        }
        for mv in self.saved.iter().copied().collect::<Vec<_>>() {
            let mut sim = Simulator::new(world, sampler, config, state, gravity, outcomes);
            sim.tick(&mv.input, mv.dt);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Capsule, PlaneWorld};
    use approx::assert_relative_eq;

    fn agent() -> MovementState {
        MovementState::new(Vec3::new(0.0, 0.0, 90.0), Capsule::new(34.0, 88.0))
    }

    fn run(
        prediction: &mut Prediction,
        world: &PlaneWorld,
        config: &MoveConfig,
        state: &mut MovementState,
        gravity: &mut GravityProvider,
        input: MoveInput,
        ticks: usize,
    ) -> Vec<ClientMove> {
        let mut outcomes = Vec::new();
        (0..ticks)
            .map(|_| {
                prediction.predict(
                    world,
                    &(),
                    config,
                    state,
                    gravity,
                    &mut outcomes,
                    input,
                    1.0 / 60.0,
                )
            })
            .collect()
    }

    #[test]
    fn ack_trims_saved_moves() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut prediction = Prediction::new();
        let mut state = agent();
        let mut gravity = GravityProvider::new(980.0);
        let moves = run(
            &mut prediction,
            &world,
            &config,
            &mut state,
            &mut gravity,
            MoveInput::default(),
            10,
        );
        assert_eq!(prediction.pending_moves(), 10);
        prediction.apply_ack(MoveAck { id: moves[6].id });
        assert_eq!(prediction.pending_moves(), 3);
    }

    #[test]
    fn replay_is_deterministic() {
        // Simulating the same inputs from the same state must land on
        // the same result, or reconciliation would oscillate
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let input = MoveInput {
            acc: Vec3::unit_x() * 2048.0,
            ..Default::default()
        };

        let mut gravity_a = GravityProvider::new(980.0);
        let mut state_a = agent();
        let mut prediction_a = Prediction::new();
        run(
            &mut prediction_a,
            &world,
            &config,
            &mut state_a,
            &mut gravity_a,
            input,
            60,
        );

        let mut gravity_b = GravityProvider::new(980.0);
        let mut state_b = agent();
        let mut prediction_b = Prediction::new();
        run(
            &mut prediction_b,
            &world,
            &config,
            &mut state_b,
            &mut gravity_b,
            input,
            60,
        );

        assert_eq!(state_a.pos.0, state_b.pos.0);
        assert_eq!(state_a.vel.0, state_b.vel.0);
    }

    #[test]
    fn correction_rewinds_and_replays() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let input = MoveInput {
            acc: Vec3::unit_x() * 2048.0,
            ..Default::default()
        };

        let mut prediction = Prediction::new();
        let mut state = agent();
        let mut gravity = GravityProvider::new(980.0);
        let moves = run(
            &mut prediction,
            &world,
            &config,
            &mut state,
            &mut gravity,
            input,
            30,
        );

        // The authoritative simulation of the same inputs
        let mut server_state = agent();
        let mut server_gravity = GravityProvider::new(980.0);
        let mut outcomes = Vec::new();
        for _ in 0..10 {
            let mut sim = Simulator::new(
                &world,
                &(),
                &config,
                &mut server_state,
                &mut server_gravity,
                &mut outcomes,
            );
            sim.tick(&input, 1.0 / 60.0);
        }

        let correction = ServerCorrection {
            id: moves[9].id,
            pos: server_state.pos.0,
            vel: server_state.vel.0,
            mode: server_state.mode.to_byte(),
            base: None,
            relative: false,
            ori: Some(server_state.ori),
            gravity: None,
            root_motion: None,
        };

        let mut outcomes = Vec::new();
        assert!(prediction.apply_correction(
            &world,
            &(),
            &config,
            &mut state,
            &mut gravity,
            &mut outcomes,
            correction,
        ));

        // Replaying the remaining 20 moves must reproduce the original
        // 30-move prediction, since the server agreed with move 10
        let mut reference = agent();
        let mut reference_gravity = GravityProvider::new(980.0);
        let mut reference_outcomes = Vec::new();
        for _ in 0..30 {
            let mut sim = Simulator::new(
                &world,
                &(),
                &config,
                &mut reference,
                &mut reference_gravity,
                &mut reference_outcomes,
            );
            sim.tick(&input, 1.0 / 60.0);
        }
        assert_relative_eq!(
            (state.pos.0 - reference.pos.0).magnitude(),
            0.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn stale_correction_is_discarded() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut prediction = Prediction::new();
        let mut state = agent();
        let mut gravity = GravityProvider::new(980.0);
        run(
            &mut prediction,
            &world,
            &config,
            &mut state,
            &mut gravity,
            MoveInput::default(),
            10,
        );

        let newer = ServerCorrection {
            id: 8,
            pos: state.pos.0,
            vel: Vec3::zero(),
            mode: state.mode.to_byte(),
            base: None,
            relative: false,
            ori: None,
            gravity: None,
            root_motion: None,
        };
        let mut outcomes = Vec::new();
        assert!(prediction.apply_correction(
            &world,
            &(),
            &config,
            &mut state,
            &mut gravity,
            &mut outcomes,
            newer,
        ));
        let stale = ServerCorrection { id: 3, ..newer };
        assert!(!prediction.apply_correction(
            &world,
            &(),
            &config,
            &mut state,
            &mut gravity,
            &mut outcomes,
            stale,
        ));
    }

    #[test]
    fn montage_correction_resyncs_orientation() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut prediction = Prediction::new();
        let mut state = agent();
        let mut gravity = GravityProvider::new(980.0);

        let target = common::Ori::default().with_up(common::Dir::new(Vec3::unit_x()));
        let correction = ServerCorrection {
            id: 0,
            pos: state.pos.0,
            vel: Vec3::zero(),
            mode: MoveMode::Falling.to_byte(),
            base: None,
            relative: false,
            ori: None,
            gravity: None,
            root_motion: Some(common_net::RootMotionCorrection {
                track_position: 1.25,
                rotation: target.into(),
            }),
        };
        let mut outcomes = Vec::new();
        assert!(prediction.apply_correction(
            &world,
            &(),
            &config,
            &mut state,
            &mut gravity,
            &mut outcomes,
            correction,
        ));
        assert!(state.ori.up().dot(*target.up()) > 0.9999);
    }

    #[test]
    fn relative_correction_without_base_is_rejected() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut prediction = Prediction::new();
        let mut state = agent();
        let old_pos = state.pos.0;
        let mut gravity = GravityProvider::new(980.0);

        let correction = ServerCorrection {
            id: 0,
            pos: Vec3::new(5.0, 0.0, 0.0),
            vel: Vec3::zero(),
            mode: MoveMode::Walking.to_byte(),
            base: None,
            relative: true,
            ori: None,
            gravity: None,
            root_motion: None,
        };
        let mut outcomes = Vec::new();
        assert!(!prediction.apply_correction(
            &world,
            &(),
            &config,
            &mut state,
            &mut gravity,
            &mut outcomes,
            correction,
        ));
        assert_eq!(state.pos.0, old_pos);
    }

    #[test]
    fn relative_correction_against_unknown_base_is_rejected() {
        let world = PlaneWorld::flat_floor();
        let config = MoveConfig::default();
        let mut prediction = Prediction::new();
        let mut state = agent();
        let old_pos = state.pos.0;
        let mut gravity = GravityProvider::new(980.0);

        // PlaneWorld always resolves base transforms, so reference a
        // surface that does not exist
        let correction = ServerCorrection {
            id: 0,
            pos: Vec3::new(5.0, 0.0, 0.0),
            vel: Vec3::zero(),
            mode: MoveMode::Walking.to_byte(),
            base: Some(common::BaseRef {
                surface: common::SurfaceId(999),
            }),
            relative: true,
            ori: None,
            gravity: None,
            root_motion: None,
        };
        let mut outcomes = Vec::new();
        assert!(!prediction.apply_correction(
            &world,
            &(),
            &config,
            &mut state,
            &mut gravity,
            &mut outcomes,
            correction,
        ));
        assert_eq!(state.pos.0, old_pos);
    }
}
