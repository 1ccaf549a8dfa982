//! Wire protocol: one JSON envelope per WebSocket frame.
//!
//! `decode` is total (malformed input becomes a `raw` envelope) and `encode`
//! only fails on serializer bugs. Control payloads follow a single canonical
//! shape each, see [`control`].

pub mod codec;
pub mod control;
pub mod envelope;

pub use codec::{decode, encode, EnvelopeCodec, Frame, JsonCodec};
pub use envelope::{unix_millis, Envelope, EventKind};
