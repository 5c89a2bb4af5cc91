//! Server-side movement validation
//!
//! The server re-simulates every client move with the same code the
//! client predicted it with, accepts results inside a position
//! tolerance, and answers divergent moves with authoritative
//! corrections.

#![deny(unsafe_code)]

pub mod validate;

pub use validate::{ClientId, MovementValidator};
