//! Peer registry: the id -> peer map and every outbound operation.
//!
//! Inserts (attach) and removals (close / detach) are the only structural
//! mutations. Fan-out iterates a snapshot of the map, so a peer closed
//! mid-broadcast is either skipped or has its late send rejected by its own
//! closed flag; neither case surfaces as an error.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use tether_core::error::TetherError;
use tether_core::protocol::control::{self, CLOSE_SUPERSEDED};
use tether_core::protocol::{Envelope, EnvelopeCodec, JsonCodec};
use tether_core::router::{DiagnosticSink, EventRouter, HandlerFault};

use crate::auth::{AuthValidator, PeerMeta, StaticTokenValidator};
use crate::config::{GatewayConfig, PeerMode};
use crate::liveness::UpstreamLiveness;
use crate::obs::metrics::GatewayMetrics;
use crate::policy::UpstreamGate;

use super::context::PeerCtx;
use super::peer::{Outbound, Peer, PeerId};

/// Acceptor-side behavior knobs.
#[derive(Clone)]
pub struct RegistryOptions {
    /// `None`: peers start authenticated.
    pub auth: Option<Arc<dyn AuthValidator>>,
    pub codec: Arc<dyn EnvelopeCodec>,
    pub auto_pong: bool,
    pub gate: UpstreamGate,
    pub peer_mode: PeerMode,
    pub outbound_queue: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            auth: None,
            codec: Arc::new(JsonCodec),
            auto_pong: true,
            gate: UpstreamGate::default(),
            peer_mode: PeerMode::Multi,
            outbound_queue: 1024,
        }
    }
}

impl RegistryOptions {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        let auth = cfg.auth.as_ref().map(|a| {
            Arc::new(StaticTokenValidator::new(a.tokens.iter().cloned())) as Arc<dyn AuthValidator>
        });
        Self {
            auth,
            codec: Arc::new(JsonCodec),
            auto_pong: cfg.gateway.auto_pong,
            gate: UpstreamGate::new(cfg.gating.requires_upstream.iter().map(String::as_str)),
            peer_mode: cfg.gateway.peer_mode,
            outbound_queue: cfg.gateway.outbound_queue,
        }
    }

    pub fn with_auth(mut self, validator: Arc<dyn AuthValidator>) -> Self {
        self.auth = Some(validator);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }
}

#[derive(Clone)]
pub struct PeerRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    peers: DashMap<PeerId, Arc<Peer>>,
    next_id: AtomicU64,
    /// Held across evict + insert in single-peer mode only.
    single_slot: Mutex<()>,
    opts: RegistryOptions,
    router: EventRouter<PeerCtx>,
    liveness: Arc<UpstreamLiveness>,
    metrics: Arc<GatewayMetrics>,
}

impl PeerRegistry {
    pub fn new(
        opts: RegistryOptions,
        liveness: Arc<UpstreamLiveness>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let sink_metrics = Arc::clone(&metrics);
        let sink: DiagnosticSink = Arc::new(move |fault: &HandlerFault| {
            let panicked = if fault.panicked { "true" } else { "false" };
            sink_metrics
                .handler_failures
                .inc(&[("kind", fault.kind.as_str()), ("panicked", panicked)]);
        });

        Self {
            inner: Arc::new(Inner {
                peers: DashMap::new(),
                next_id: AtomicU64::new(1),
                single_slot: Mutex::new(()),
                opts,
                router: EventRouter::with_diagnostics(sink),
                liveness,
                metrics,
            }),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.inner.opts
    }

    /// User handlers, keyed by envelope type.
    pub fn router(&self) -> &EventRouter<PeerCtx> {
        &self.inner.router
    }

    pub fn liveness(&self) -> &Arc<UpstreamLiveness> {
        &self.inner.liveness
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.inner.metrics
    }

    // --------------------
    // Lifecycle
    // --------------------

    /// Register a new peer; the receiver feeds its socket writer.
    pub fn attach(&self, remote: Option<SocketAddr>, path: &str) -> (Arc<Peer>, mpsc::Receiver<Outbound>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.opts.outbound_queue);
        let meta = PeerMeta {
            id,
            remote,
            path: path.to_string(),
        };
        let peer = Arc::new(Peer::new(meta, tx, self.inner.opts.auth.is_none()));

        if self.inner.opts.peer_mode == PeerMode::Single {
            // Concurrent attaches must not both observe an empty map.
            let _slot = self
                .inner
                .single_slot
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            for victim in self.peer_ids() {
                if self.close(victim, CLOSE_SUPERSEDED, "superseded") {
                    tracing::info!(peer = victim, by = id, "peer superseded");
                }
            }
            self.inner.peers.insert(id, Arc::clone(&peer));
        } else {
            self.inner.peers.insert(id, Arc::clone(&peer));
        }

        self.inner.metrics.peers_accepted.inc(&[]);
        self.sync_active();
        tracing::debug!(peer = id, remote = ?remote, "peer attached");
        (peer, rx)
    }

    /// Forget a peer whose socket is gone. Returns `false` if already removed.
    pub fn detach(&self, id: PeerId) -> bool {
        let removed = self.inner.peers.remove(&id).is_some();
        if removed {
            self.sync_active();
            tracing::debug!(peer = id, "peer detached");
        }
        removed
    }

    /// Stop routing to `id` now and queue a close frame. No-op if absent.
    pub fn close(&self, id: PeerId, code: u16, reason: &str) -> bool {
        let Some((_, peer)) = self.inner.peers.remove(&id) else {
            return false;
        };
        peer.shut(code, reason);
        self.sync_active();
        tracing::debug!(peer = id, code, reason, "peer closed");
        true
    }

    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        self.peer_ids()
            .into_iter()
            .filter(|id| self.close(*id, code, reason))
            .count()
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.inner.peers.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.inner.peers.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of peers currently subscribed to `stream`.
    pub fn subscribers(&self, stream: &str) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .inner
            .peers
            .iter()
            .filter(|r| r.value().is_subscribed(stream))
            .map(|r| *r.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn sync_active(&self) {
        self.inner
            .metrics
            .peers_active
            .set(self.inner.peers.len() as i64);
    }

    // --------------------
    // Outbound
    // --------------------

    /// Send to every peer regardless of subscriptions.
    pub fn broadcast(&self, env: &Envelope) -> usize {
        self.fan_out(env, |_| true)
    }

    /// Send `{type: stream, ts, data}` to the subscribers of `stream`.
    pub fn publish(&self, stream: &str, data: Value) -> usize {
        let env = Envelope::with_data(stream, data).stamped();
        self.publish_envelope(&env)
    }

    /// Send `env` to the subscribers of its own type.
    pub fn publish_envelope(&self, env: &Envelope) -> usize {
        let stream = env.type_str();
        self.fan_out(env, |p| p.is_subscribed(stream))
    }

    /// Unicast; `false` (never an error) if the peer is gone.
    pub fn send_to(&self, id: PeerId, env: &Envelope) -> bool {
        match self.get(id) {
            Some(peer) => self.send_envelope(&peer, env).is_ok(),
            None => false,
        }
    }

    fn fan_out<F>(&self, env: &Envelope, filter: F) -> usize
    where
        F: Fn(&Peer) -> bool,
    {
        // encode once, send N times
        let text = match self.inner.opts.codec.encode(env) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(kind = %env.kind, error = %e, "fan-out encode failed");
                return 0;
            }
        };

        let targets: Vec<Arc<Peer>> = self
            .inner
            .peers
            .iter()
            .filter(|r| filter(r.value().as_ref()))
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut delivered = 0usize;
        for peer in &targets {
            if peer.enqueue(Outbound::Text(text.clone())).is_ok() {
                delivered += 1;
            }
        }
        let dropped = targets.len() - delivered;
        self.inner.metrics.publish_delivered.add(&[], delivered as u64);
        if dropped > 0 {
            self.inner.metrics.publish_dropped.add(&[], dropped as u64);
        }
        tracing::trace!(kind = %env.kind, delivered, dropped, "fan-out");
        delivered
    }

    pub(crate) fn send_envelope(&self, peer: &Peer, env: &Envelope) -> tether_core::Result<()> {
        let text = self.inner.opts.codec.encode(env)?;
        let res = peer.enqueue(Outbound::Text(text));
        if res.is_err() {
            self.inner.metrics.publish_dropped.inc(&[]);
        }
        res
    }

    pub(crate) fn reply_error(&self, peer: &Peer, err: &TetherError) {
        let code = err.client_code();
        self.inner
            .metrics
            .error_replies
            .inc(&[("code", code.as_str())]);
        let _ = self.send_envelope(peer, &control::error_from(err).stamped());
    }

    // --------------------
    // Upstream liveness
    // --------------------

    /// The single writer path of the liveness flag. Returns `true` if it flipped.
    pub fn observe_status(&self, env: &Envelope) -> bool {
        let Some(status) = control::parse_status(env) else {
            return false;
        };
        let flipped = self.inner.liveness.apply(&status);
        if flipped {
            let snap = self.inner.liveness.snapshot();
            self.inner.metrics.upstream_live.set(i64::from(snap.live));
            tracing::info!(live = snap.live, label = ?snap.label, "upstream liveness changed");
        }
        flipped
    }
}
