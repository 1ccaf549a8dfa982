//! Upstream bridge: a reconnecting client towards the producer.
//!
//! - producer envelopes are published to subscribers of their type
//! - producer `status` envelopes, and the bridge losing its socket, go through
//!   [`PeerRegistry::observe_status`], the only writer of upstream liveness.
//!   Status is observed from the client's router, which the driver runs in
//!   arrival order, so no status is lost to event-channel lag.
//! - gated request kinds that pass the gate are forwarded to the producer

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use tether_client::{Client, ClientConfig, ClientEvent, ClientSender, ConnState};
use tether_core::error::{Result, TetherError};
use tether_core::protocol::{control, Envelope, EventKind};

use crate::registry::{PeerCtx, PeerRegistry};

pub struct UpstreamBridge {
    client: Client,
    pump: JoinHandle<()>,
}

impl UpstreamBridge {
    /// Register forwarders, start pumping producer events, and connect.
    pub fn start(cfg: ClientConfig, registry: PeerRegistry) -> Result<Self> {
        let client = Client::new(cfg)?;

        let kinds: Vec<EventKind> = registry.options().gate.gated_kinds().cloned().collect();
        for kind in kinds {
            let sender = client.sender();
            registry.router().on_fn(kind, move |ctx: PeerCtx, env: Envelope| {
                let sender = sender.clone();
                async move {
                    if sender.send(env).is_err() {
                        // producer dropped between the gate and the send
                        ctx.send_error(&TetherError::UpstreamUnavailable);
                    }
                    Ok(())
                }
            });
        }

        let writer = registry.clone();
        client
            .router()
            .on_fn(EventKind::Status, move |_: ClientSender, env: Envelope| {
                writer.observe_status(&env);
                async { Ok(()) }
            });

        let events = client.events();
        let pump = tokio::spawn(pump(events, client.sender(), registry));
        client.connect();
        Ok(Self { client, pump })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn shutdown(self) {
        self.client.close(None, Some("gateway shutdown")).await;
        self.pump.abort();
    }
}

async fn pump(
    mut events: tokio::sync::broadcast::Receiver<ClientEvent>,
    upstream: ClientSender,
    registry: PeerRegistry,
) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::Message(env)) => {
                registry.publish_envelope(&env);
            }
            Ok(ClientEvent::Open) => tracing::info!("upstream bridge connected"),
            Ok(ClientEvent::Close { code, reason }) => {
                tracing::info!(?code, reason = %reason, "upstream bridge closed");
                registry.observe_status(&control::producer_status(false, None));
            }
            Ok(ClientEvent::ReconnectFailed { attempt, error }) => {
                tracing::warn!(attempt, error = %error, "upstream reconnect failed");
            }
            Ok(other) => tracing::debug!(event = ?other, "upstream bridge event"),
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "upstream bridge lagged; producer events dropped");
                // a dropped Close must still take liveness down
                if upstream.state() != ConnState::Open {
                    registry.observe_status(&control::producer_status(false, None));
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}
