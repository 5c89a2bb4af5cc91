use crate::{
    floor::FloorResult,
    mode::MoveMode,
    ori::Ori,
    util::Dir,
    world::{Capsule, SurfaceId},
};
use serde::{Deserialize, Serialize};
use vek::*;

/// Position of the capsule center
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pos(pub Vec3<f32>);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vel(pub Vec3<f32>);

/// Movable geometry the agent is standing on
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRef {
    pub surface: SurfaceId,
}

/// Steering for one tick
///
/// Everything that influences the integrators must be in here so a
/// recorded move can be replayed bit for bit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveInput {
    /// Requested world-space acceleration, clamped to the configured
    /// maximum before use
    pub acc: Vec3<f32>,
    pub jump: bool,
    pub crouch: bool,
    pub root_motion: Option<RootMotion>,
}

/// Animation-driven velocity folded into the integrators
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RootMotion {
    pub vel: Vec3<f32>,
    /// Blend on top of simulated velocity instead of replacing it
    pub additive: bool,
    /// Playback position of the driving animation, in seconds; echoed
    /// back by corrections so both ends resynchronize the montage
    pub track_position: f32,
}

/// Complete dynamic state of one simulated agent
#[derive(Clone, Debug, PartialEq)]
pub struct MovementState {
    pub pos: Pos,
    pub vel: Vel,
    pub ori: Ori,
    /// Acceleration actually applied last substep
    pub acc: Vec3<f32>,
    pub mode: MoveMode,
    pub capsule: Capsule,
    /// Capsule half height when not crouching
    pub standing_half_height: f32,
    pub crouching: bool,
    pub floor: FloorResult,
    pub base: Option<BaseRef>,
    pub pending_impulse: Vec3<f32>,
    pub pending_force: Vec3<f32>,
    pub pending_launch: Option<Vec3<f32>>,
    /// Seconds the current jump has been held, while airborne from a jump
    pub jump_hold_time: Option<f32>,
    /// Set when position was written directly; suppresses deriving
    /// velocity from displacement this tick
    pub just_teleported: bool,
}

impl MovementState {
    pub fn new(pos: Vec3<f32>, capsule: Capsule) -> Self {
        Self {
            pos: Pos(pos),
            vel: Vel(Vec3::zero()),
            ori: Ori::default(),
            acc: Vec3::zero(),
            mode: MoveMode::default(),
            capsule,
            standing_half_height: capsule.half_height,
            crouching: false,
            floor: FloorResult::default(),
            base: None,
            pending_impulse: Vec3::zero(),
            pending_force: Vec3::zero(),
            pending_launch: None,
            jump_hold_time: None,
            just_teleported: false,
        }
    }

    pub fn up(&self) -> Dir { self.ori.up() }

    pub fn bottom_sphere_center(&self) -> Vec3<f32> {
        self.capsule.bottom_sphere_center(self.pos.0, self.up())
    }

    pub fn bottom_point(&self) -> Vec3<f32> { self.capsule.bottom_point(self.pos.0, self.up()) }

    /// Move without sweeping and suppress displacement velocity this tick
    pub fn teleport_to(&mut self, pos: Vec3<f32>) {
        self.pos = Pos(pos);
        self.just_teleported = true;
    }

    pub fn add_impulse(&mut self, impulse: Vec3<f32>) { self.pending_impulse += impulse; }

    pub fn add_force(&mut self, force: Vec3<f32>) { self.pending_force += force; }

    /// Replace velocity at the start of the next tick and switch to
    /// falling
    pub fn launch(&mut self, vel: Vec3<f32>) { self.pending_launch = Some(vel); }
}
