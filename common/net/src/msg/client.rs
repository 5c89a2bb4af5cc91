use common::{state::BaseRef, state::MoveInput, Ori};
use serde::{Deserialize, Serialize};
use vek::*;

/// One simulated move, sent client to server
///
/// Carries the input that produced it plus the client's claimed result
/// so the server can re-simulate and compare. `id` increases by one per
/// move and orders the stream.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientMove {
    pub id: u64,
    /// Tick length in seconds
    pub dt: f32,
    pub input: MoveInput,
    /// Claimed capsule center after the move; relative to the base
    /// transform when `base` is set
    pub pos: Vec3<f32>,
    pub vel: Vec3<f32>,
    pub ori: Ori,
    /// Movement mode packed through `MoveMode::to_byte`
    pub mode: u8,
    pub base: Option<BaseRef>,
}
