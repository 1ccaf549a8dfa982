//! tether gateway: the accepting side of tether connections.
//!
//! Wires the axum transport, the connection registry (auth gate, control
//! intercept, upstream gate, event routing), the upstream liveness flag and
//! the optional bridge towards the producer. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod liveness;
pub mod obs;
pub mod ops;
pub mod policy;
pub mod registry;
pub mod router;
pub mod transport;

pub use app_state::AppState;
pub use auth::{AuthValidator, PeerMeta, StaticTokenValidator};
pub use bridge::UpstreamBridge;
pub use config::GatewayConfig;
pub use liveness::UpstreamLiveness;
pub use registry::{PeerCtx, PeerRegistry, RegistryOptions};
