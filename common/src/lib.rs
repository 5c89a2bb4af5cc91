//! Capsule locomotion under arbitrary gravity
//!
//! The simulation is deterministic and host-agnostic: collision geometry
//! is reached through the [`CollisionWorld`] trait, gravity sources
//! through [`GravitySampler`], and everything an agent is lives in a
//! [`MovementState`] that can be snapshotted, serialized and replayed.
//! Client and server run the same [`Simulator`] over the same inputs and
//! agree bit for bit.

#![deny(unsafe_code)]
#![deny(clippy::clone_on_ref_ptr)]

pub mod config;
pub mod consts;
pub mod floor;
pub mod gravity;
pub mod mode;
pub mod ori;
pub mod outcome;
pub mod sim;
mod slide;
pub mod state;
pub mod util;
pub mod world;

pub use self::{
    config::MoveConfig,
    floor::{FloorResult, FloorScanner},
    gravity::{GravityConfig, GravityMode, GravityProvider, GravitySampler, GravitySourceId},
    mode::MoveMode,
    ori::{Ori, RotatePivot},
    outcome::Outcome,
    sim::Simulator,
    state::{BaseRef, MoveInput, MovementState, Pos, RootMotion, Vel},
    util::Dir,
    world::{Capsule, CollisionWorld, Fluid, Hit, PlaneWorld, SurfaceId, SweepShape},
};
