//! Event router: `EventKind -> [handler...]` with isolated failures.
//!
//! Used by the initiating client (context = client handle) and by the gateway
//! (context = per-peer context). Handlers run sequentially in registration
//! order; an `Err` or a panic from one handler is reported to the diagnostic
//! sink and never stops the remaining handlers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;

use crate::error::Result;
use crate::protocol::control;
use crate::protocol::envelope::{Envelope, EventKind};

/// Async event handler.
#[async_trait]
pub trait EventHandler<C>: Send + Sync {
    async fn handle(&self, ctx: C, env: Envelope) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<C, F, Fut> EventHandler<C> for FnHandler<F>
where
    C: Send + 'static,
    F: Fn(C, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: C, env: Envelope) -> Result<()> {
        (self.0)(ctx, env).await
    }
}

/// Wrap a closure returning a future as a handler.
pub fn handler_fn<C, F, Fut>(f: F) -> Arc<dyn EventHandler<C>>
where
    C: Send + 'static,
    F: Fn(C, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Registration token returned by [`EventRouter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A failed handler invocation, as seen by the diagnostic sink.
#[derive(Debug, Clone)]
pub struct HandlerFault {
    pub kind: EventKind,
    pub handler: HandlerId,
    pub reason: String,
    pub panicked: bool,
}

pub type DiagnosticSink = Arc<dyn Fn(&HandlerFault) + Send + Sync>;

/// Outcome of one dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub invoked: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
    /// No handler was registered for the kind; the fallback path was taken.
    pub unhandled: bool,
}

type Registration<C> = (HandlerId, Arc<dyn EventHandler<C>>);

pub struct EventRouter<C> {
    handlers: DashMap<EventKind, Vec<Registration<C>>>,
    next_id: AtomicU64,
    sink: Option<DiagnosticSink>,
}

impl<C> Default for EventRouter<C>
where
    C: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventRouter<C>
where
    C: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            sink: None,
        }
    }

    /// Router that also forwards handler faults to `sink`.
    pub fn with_diagnostics(sink: DiagnosticSink) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new()
        }
    }

    pub fn on(&self, kind: impl Into<EventKind>, handler: Arc<dyn EventHandler<C>>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind.into())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn on_fn<F, Fut>(&self, kind: impl Into<EventKind>, f: F) -> HandlerId
    where
        F: Fn(C, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on(kind, handler_fn(f))
    }

    /// Remove one registration. Returns false if it was not present.
    pub fn off(&self, kind: &EventKind, id: HandlerId) -> bool {
        let Some(mut list) = self.handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        let removed = list.len() != before;
        if list.is_empty() {
            drop(list);
            self.handlers.remove_if(kind, |_, v| v.is_empty());
        }
        removed
    }

    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.get(kind).map(|v| v.len()).unwrap_or(0)
    }

    /// Dispatch keyed by the envelope's own kind.
    pub async fn route(&self, ctx: C, env: Envelope) -> DispatchReport {
        let kind = env.kind.clone();
        self.dispatch(&kind, env, ctx).await
    }

    pub async fn dispatch(&self, kind: &EventKind, env: Envelope, ctx: C) -> DispatchReport {
        let targets = self.snapshot(kind);
        if !targets.is_empty() {
            return self.run(kind, &targets, env, ctx).await;
        }

        if *kind == EventKind::Unhandled {
            tracing::debug!("unhandled event without fallback handler");
            return DispatchReport {
                unhandled: true,
                ..Default::default()
            };
        }

        let fallback = self.snapshot(&EventKind::Unhandled);
        if fallback.is_empty() {
            tracing::debug!(kind = %kind, "no handler registered; event dropped");
            return DispatchReport {
                unhandled: true,
                ..Default::default()
            };
        }

        let wrapped = control::unhandled(&Envelope {
            kind: kind.clone(),
            ..env
        });
        let mut report = self.run(&EventKind::Unhandled, &fallback, wrapped, ctx).await;
        report.unhandled = true;
        report
    }

    // Clone the list so no map guard is held across handler awaits.
    fn snapshot(&self, kind: &EventKind) -> Vec<Registration<C>> {
        self.handlers
            .get(kind)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    async fn run(
        &self,
        kind: &EventKind,
        targets: &[Registration<C>],
        env: Envelope,
        ctx: C,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, handler) in targets {
            let fut = handler.handle(ctx.clone(), env.clone());
            let fault = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {
                    report.invoked += 1;
                    continue;
                }
                Ok(Err(e)) => HandlerFault {
                    kind: kind.clone(),
                    handler: *id,
                    reason: e.to_string(),
                    panicked: false,
                },
                Err(payload) => HandlerFault {
                    kind: kind.clone(),
                    handler: *id,
                    reason: panic_message(payload.as_ref()),
                    panicked: true,
                },
            };
            report.failed += 1;
            tracing::warn!(
                kind = %fault.kind,
                handler = fault.handler.0,
                panicked = fault.panicked,
                reason = %fault.reason,
                "event handler failed"
            );
            if let Some(sink) = &self.sink {
                sink(&fault);
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
