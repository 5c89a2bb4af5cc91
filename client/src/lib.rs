//! Client-side movement prediction
//!
//! The client simulates its own moves immediately, remembers each one,
//! and reconciles against server acks and corrections: a correction
//! rewinds to the authoritative state and silently replays every
//! remembered move on top of it.

#![deny(unsafe_code)]

pub mod prediction;

pub use prediction::Prediction;
