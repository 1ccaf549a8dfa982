//! Top-level facade crate for tether.
//!
//! Re-exports the protocol core, the reconnecting client and the gateway so
//! users can depend on a single crate.

pub mod core {
    pub use tether_core::*;
}

pub mod client {
    pub use tether_client::*;
}

pub mod gateway {
    pub use tether_gateway::*;
}

pub use tether_client::{Client, ClientConfig, ClientEvent, ConnState};
pub use tether_core::{Envelope, EventKind, Result, TetherError};
pub use tether_gateway::{AppState, GatewayConfig, PeerRegistry};
