//! Inbound processing for one peer's frames.
//!
//! Called sequentially by the peer's session task, so auth and subscription
//! transitions of one peer are never reordered.

use std::sync::Arc;

use serde_json::Value;

use tether_core::error::TetherError;
use tether_core::protocol::control::{self, StatusKind, CLOSE_POLICY_VIOLATION};
use tether_core::protocol::{Envelope, EventKind, Frame};

use crate::auth::AuthValidator;
use crate::policy::PolicyDecision;

use super::context::PeerCtx;
use super::hub::PeerRegistry;
use super::peer::Peer;

impl PeerRegistry {
    /// Decode one frame and run it through the pipeline.
    pub async fn handle_frame(&self, peer: &Arc<Peer>, frame: Frame) {
        if peer.is_closed() {
            return;
        }
        self.metrics().frames_in.inc(&[]);
        let env = self.options().codec.decode(frame);
        self.handle_envelope(peer, env).await;
    }

    /// Auth gate, control intercept, upstream gate, then user routing.
    pub async fn handle_envelope(&self, peer: &Arc<Peer>, env: Envelope) {
        if peer.is_closed() {
            return;
        }

        if !peer.is_authenticated() {
            match self.options().auth.clone() {
                Some(validator) => {
                    self.authenticate(peer, validator, env).await;
                    return;
                }
                None => peer.mark_authenticated(),
            }
        }

        if self.intercept_control(peer, &env) {
            return;
        }

        let live = self.liveness().is_live();
        if let PolicyDecision::Reject(reason) = self.options().gate.check(&env.kind, live) {
            tracing::debug!(peer = peer.id(), kind = %env.kind, "gated request rejected");
            self.reply_error(peer, &reason.to_error());
            return;
        }

        if env.kind == EventKind::Status {
            self.observe_status(&env);
        }

        let kind = env.kind.clone();
        let ctx = PeerCtx::new(self.clone(), Arc::clone(peer));
        let report = self.router().route(ctx, env).await;
        tracing::debug!(
            peer = peer.id(),
            kind = %kind,
            invoked = report.invoked,
            failed = report.failed,
            unhandled = report.unhandled,
            "routed"
        );
    }

    async fn authenticate(&self, peer: &Arc<Peer>, validator: Arc<dyn AuthValidator>, env: Envelope) {
        if env.kind != EventKind::Auth {
            tracing::debug!(peer = peer.id(), kind = %env.kind, "envelope before auth");
            self.reply_error(peer, &TetherError::Unauthenticated);
            return;
        }

        let credential = env.data.unwrap_or(Value::Null);
        match validator.validate(&credential, peer.meta()).await {
            Ok(()) => {
                peer.mark_authenticated();
                tracing::info!(peer = peer.id(), "peer authenticated");
                let _ = self.send_envelope(peer, &control::status(StatusKind::Authenticated).stamped());
            }
            Err(e) => {
                tracing::warn!(peer = peer.id(), error = %e, "auth rejected");
                self.reply_error(peer, &TetherError::AuthFailed);
                self.close(peer.id(), CLOSE_POLICY_VIOLATION, "auth failed");
            }
        }
    }

    /// Built-in control envelopes. Returns `true` if consumed.
    fn intercept_control(&self, peer: &Peer, env: &Envelope) -> bool {
        match env.kind {
            EventKind::Subscribe | EventKind::Unsubscribe => {
                let stream = match control::parse_stream(env) {
                    Ok(s) => s,
                    Err(e) => {
                        self.reply_error(peer, &e);
                        return true;
                    }
                };
                let (changed, ack) = if env.kind == EventKind::Subscribe {
                    (peer.subscribe(&stream), StatusKind::Subscribed)
                } else {
                    (peer.unsubscribe(&stream), StatusKind::Unsubscribed)
                };
                tracing::debug!(peer = peer.id(), stream = %stream, changed, "subscription updated");
                let _ = self.send_envelope(peer, &control::stream_ack(ack, &stream).stamped());
                true
            }
            EventKind::Ping if self.options().auto_pong => {
                let _ = self.send_envelope(peer, &control::pong_for(env));
                true
            }
            _ => false,
        }
    }
}
