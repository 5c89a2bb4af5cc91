use common::{
    gravity::GravitySampler, Capsule, CollisionWorld, GravityProvider, MoveConfig, MoveMode,
    MovementState, Outcome, Simulator,
};
use common_net::{ClientMove, MoveAck, RootMotionCorrection, ServerCorrection, ServerMsg};
use hashbrown::HashMap;
use tracing::{debug, trace};
use vek::*;

/// Stable handle of a connected client
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Position error above which a move is corrected
const DEFAULT_POSITION_TOLERANCE: f32 = 3.0;
/// Errors above this are logged; they suggest more than float drift
const LARGE_ERROR_DISTANCE: f32 = 50.0;
/// Ticks longer than this are clamped before simulation so clients
/// cannot buy extra movement with fake timestamps
const MAX_MOVE_DT: f32 = 0.25;

struct ClientSession {
    state: MovementState,
    gravity: GravityProvider,
    last_move_id: Option<u64>,
    /// Next move is corrected regardless of error
    force_update: bool,
}

/// Re-simulates client moves and issues acks and corrections
pub struct MovementValidator {
    config: MoveConfig,
    position_tolerance: f32,
    clients: HashMap<ClientId, ClientSession>,
}

impl MovementValidator {
    pub fn new(config: MoveConfig) -> Self {
        Self {
            config,
            position_tolerance: DEFAULT_POSITION_TOLERANCE,
            clients: HashMap::new(),
        }
    }

    pub fn with_position_tolerance(mut self, tolerance: f32) -> Self {
        self.position_tolerance = tolerance.max(0.0);
        self
    }

    pub fn insert_client(&mut self, id: ClientId, pos: Vec3<f32>, capsule: Capsule) {
        self.clients.insert(id, ClientSession {
            state: MovementState::new(pos, capsule),
            gravity: GravityProvider::new(self.config.gravity_magnitude),
            last_move_id: None,
            force_update: false,
        });
    }

    pub fn remove_client(&mut self, id: ClientId) { self.clients.remove(&id); }

    pub fn client_state(&self, id: ClientId) -> Option<&MovementState> {
        self.clients.get(&id).map(|s| &s.state)
    }

    pub fn gravity_mut(&mut self, id: ClientId) -> Option<&mut GravityProvider> {
        self.clients.get_mut(&id).map(|s| &mut s.gravity)
    }

    /// Correct the client's next move unconditionally, used after server
    /// authoritative changes like teleports
    pub fn force_update(&mut self, id: ClientId) {
        if let Some(session) = self.clients.get_mut(&id) {
            session.force_update = true;
        }
    }

    /// Re-simulate one client move; `None` for unknown clients and
    /// discarded stale moves
    pub fn handle_move<W: CollisionWorld, S: GravitySampler>(
        &mut self,
        world: &W,
        sampler: &S,
        id: ClientId,
        mv: ClientMove,
        outcomes: &mut Vec<Outcome>,
    ) -> Option<ServerMsg> {
        let session = self.clients.get_mut(&id)?;

        // Out-of-order or duplicated moves are dropped; the client will
        // keep replaying them until an ack or correction covers them
        if session.last_move_id.is_some_and(|last| mv.id <= last) {
            trace!(id = mv.id, "Discarding out-of-order move");
            return None;
        }
        session.last_move_id = Some(mv.id);

        let dt = mv.dt.clamp(0.0, MAX_MOVE_DT);
        {
            let mut sim = Simulator::new(
                world,
                sampler,
                &self.config,
                &mut session.state,
                &mut session.gravity,
                outcomes,
            );
            sim.tick(&mv.input, dt);
        }

        // Resolve the claimed position into world space
        let claimed_pos = match mv.base {
            Some(base) => match world.base_transform(base.surface) {
                Some(transform) => Some((transform * Vec4::from_point(mv.pos)).xyz()),
                None => {
                    debug!(
                        surface = base.surface.0,
                        "Client claims an unknown base, correcting"
                    );
                    None
                },
            },
            None => Some(mv.pos),
        };

        let Some(claimed_pos) = claimed_pos else {
            return Some(Self::correction(session, &mv));
        };
        let error = (session.state.pos.0 - claimed_pos).magnitude();
        let mode_matches = session.state.mode == MoveMode::from_byte(mv.mode);

        if !session.force_update && error <= self.position_tolerance && mode_matches {
            // Within tolerance the client result is adopted wholesale,
            // so small float drift does not accumulate into corrections
            session.state.teleport_to(claimed_pos);
            session.state.vel.0 = mv.vel;
            session.state.ori = mv.ori;
            Some(ServerMsg::Ack(MoveAck { id: mv.id }))
        } else {
            if error > LARGE_ERROR_DISTANCE {
                debug!(error, id = mv.id, "Large movement error, correcting");
            }
            Some(Self::correction(session, &mv))
        }
    }

    fn correction(session: &mut ClientSession, mv: &ClientMove) -> ServerMsg {
        session.force_update = false;
        ServerMsg::Correction(ServerCorrection {
            id: mv.id,
            pos: session.state.pos.0,
            vel: session.state.vel.0,
            mode: session.state.mode.to_byte(),
            base: session.state.base,
            // The server's own positions are world-space here; relative
            // corrections are produced by hosts that track base motion
            relative: false,
            ori: Some(session.state.ori),
            gravity: session.gravity.take_update(),
            // Montage-driven moves resynchronize playback as well
            root_motion: mv.input.root_motion.map(|rm| RootMotionCorrection {
                track_position: rm.track_position,
                rotation: session.state.ori.into(),
            }),
        })
    }
}
