//! Transport layer (axum WebSocket).
//!
//! `ws` owns the upgrade and the per-peer session loop; `codec` maps socket
//! messages to registry frames and queued outbound frames back to messages.

pub mod codec;
pub mod ws;
