//! tether client: the initiating side of a tether connection.
//!
//! - `backoff`: reconnect delay arithmetic
//! - `machine`: pure connection state machine (`(state, input) -> actions`)
//! - `client`: tokio driver that executes those actions over a WebSocket
//! - `config`: connection settings (also embedded by the gateway's upstream bridge)
//!
//! Transport faults never reach callers as errors: they surface as
//! [`ClientEvent`]s and are retried on the backoff schedule until
//! [`Client::close`] is called.

pub mod backoff;
pub mod client;
pub mod config;
pub mod machine;
pub mod transport;

pub use backoff::Backoff;
pub use client::{Client, ClientSender};
pub use config::ClientConfig;
pub use machine::{ClientEvent, ConnState};
