//! Wire messages for movement replication
//!
//! Everything here is plain serde data: the client streams numbered
//! moves, the server answers each with an ack or a correction, and
//! gravity changes ride alongside as their own message.

#![deny(unsafe_code)]

pub mod msg;

pub use msg::{
    ClientMove, CompactOri, GravityUpdate, MoveAck, RootMotionCorrection, ServerCorrection,
    ServerMsg,
};
