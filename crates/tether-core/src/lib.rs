//! tether core: transport-agnostic protocol primitives shared by the
//! reconnecting client and the gateway.
//!
//! - `protocol`: wire envelope, total codec, canonical control shapes
//! - `router`: kind-keyed handler fan-out with per-handler fault isolation
//! - `error`: shared error surface and stable client-facing codes
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed frames
//! degrade to `raw` envelopes instead of failing, so a hostile or confused
//! peer cannot take a connection down through the codec.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod router;

/// Shared result type.
pub use error::{Result, TetherError};
pub use protocol::{Envelope, EventKind};
pub use router::{EventHandler, EventRouter};
