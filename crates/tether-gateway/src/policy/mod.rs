//! Request gating.
//!
//! Compiles the `gating` config into a lookup the registry consults before
//! routing a peer's envelope.

pub mod gate;

pub use gate::{PolicyDecision, UpstreamGate};
