//! Connection registry (acceptor side).
//!
//! - `peer`: one accepted connection (outbound queue, subscriptions, auth flag)
//! - `hub`: the id -> peer map plus broadcast / publish / unicast / close
//! - `pipeline`: per-frame inbound processing (decode, auth, control, gate, route)
//! - `context`: handle given to event handlers, bound to one peer

pub mod context;
pub mod hub;
pub mod peer;
mod pipeline;

pub use context::PeerCtx;
pub use hub::{PeerRegistry, RegistryOptions};
pub use peer::{Outbound, Peer, PeerId};
