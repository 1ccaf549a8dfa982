use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use tether_core::error::{Result, TetherError};

use crate::auth::PeerMeta;

pub type PeerId = u64;

/// Frame queued for a peer's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    /// Last frame; the writer stops after it.
    Close { code: u16, reason: String },
}

/// One accepted connection.
pub struct Peer {
    meta: PeerMeta,
    tx: mpsc::Sender<Outbound>,
    authenticated: AtomicBool,
    subscriptions: DashSet<String>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Peer {
    pub(crate) fn new(meta: PeerMeta, tx: mpsc::Sender<Outbound>, authenticated: bool) -> Self {
        Self {
            meta,
            tx,
            authenticated: AtomicBool::new(authenticated),
            subscriptions: DashSet::new(),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.meta.id
    }

    pub fn meta(&self) -> &PeerMeta {
        &self.meta
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn is_subscribed(&self, stream: &str) -> bool {
        self.subscriptions.contains(stream)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut out: Vec<String> = self.subscriptions.iter().map(|s| s.key().clone()).collect();
        out.sort();
        out
    }

    /// Returns `false` if already subscribed.
    pub(crate) fn subscribe(&self, stream: &str) -> bool {
        self.subscriptions.insert(stream.to_string())
    }

    /// Returns `false` if not subscribed.
    pub(crate) fn unsubscribe(&self, stream: &str) -> bool {
        self.subscriptions.remove(stream).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a frame without waiting; a full queue drops it.
    pub fn enqueue(&self, out: Outbound) -> Result<()> {
        if self.is_closed() {
            return Err(TetherError::NotOpen);
        }
        match self.tx.try_send(out) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(peer = self.id(), "outbound queue full; frame dropped");
                Err(TetherError::Transport("outbound queue full".into()))
            }
            Err(TrySendError::Closed(_)) => Err(TetherError::NotOpen),
        }
    }

    /// Mark closed and queue the close frame. Only the first call has effect.
    pub(crate) fn shut(&self, code: u16, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        self.close_signal.notify_one();
        true
    }

    /// Resolves once the peer has been closed by the registry.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }
}
