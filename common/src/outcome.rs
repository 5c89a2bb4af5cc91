use crate::{
    mode::MoveMode,
    util::Dir,
    world::{Hit, SurfaceId},
};
use vek::*;

/// Discrete events produced while ticking an agent
///
/// The simulation pushes these into a queue the host drains once per tick,
/// in place of callbacks into host code from the middle of the integrator.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Touched down on a walkable floor after falling
    Landed {
        pos: Vec3<f32>,
        vel: Vec3<f32>,
        surface: SurfaceId,
    },
    ModeChanged {
        old: MoveMode,
        new: MoveMode,
    },
    /// The orientation up axis was changed by floor or gravity alignment
    UpAxisChanged {
        old: Dir,
        new: Dir,
    },
    /// The gravity field configuration changed
    GravityChanged,
    /// Ran into a surface too steep to walk on
    UnwalkableHit {
        hit: Hit,
    },
    /// Reached the apex of a jump or launch
    JumpApex {
        pos: Vec3<f32>,
    },
    StartCrouch {
        half_height_delta: f32,
    },
    EndCrouch {
        half_height_delta: f32,
    },
}
