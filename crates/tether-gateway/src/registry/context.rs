use std::sync::Arc;

use tether_core::error::{Result, TetherError};
use tether_core::protocol::Envelope;

use crate::auth::PeerMeta;

use super::hub::PeerRegistry;
use super::peer::{Peer, PeerId};

/// Handler context bound to the peer whose envelope is being routed.
#[derive(Clone)]
pub struct PeerCtx {
    registry: PeerRegistry,
    peer: Arc<Peer>,
}

impl PeerCtx {
    pub(crate) fn new(registry: PeerRegistry, peer: Arc<Peer>) -> Self {
        Self { registry, peer }
    }

    pub fn id(&self) -> PeerId {
        self.peer.id()
    }

    pub fn meta(&self) -> &PeerMeta {
        self.peer.meta()
    }

    /// The whole registry, for handlers that publish or broadcast.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn send(&self, env: &Envelope) -> Result<()> {
        self.registry.send_envelope(&self.peer, env)
    }

    pub fn send_error(&self, err: &TetherError) {
        self.registry.reply_error(&self.peer, err);
    }

    pub fn subscribe(&self, stream: &str) -> bool {
        self.peer.subscribe(stream)
    }

    pub fn unsubscribe(&self, stream: &str) -> bool {
        self.peer.unsubscribe(stream)
    }

    pub fn is_subscribed(&self, stream: &str) -> bool {
        self.peer.is_subscribed(stream)
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.registry.close(self.peer.id(), code, reason)
    }
}
