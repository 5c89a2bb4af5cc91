pub mod client;
pub mod server;

pub use client::ClientMove;
pub use server::{
    CompactOri, GravityUpdate, MoveAck, RootMotionCorrection, ServerCorrection, ServerMsg,
};
