use std::collections::HashSet;

use tether_core::error::TetherError;
use tether_core::protocol::EventKind;

/// Decision from gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Pass,
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UpstreamUnavailable,
}

impl RejectReason {
    pub fn to_error(self) -> TetherError {
        match self {
            RejectReason::UpstreamUnavailable => TetherError::UpstreamUnavailable,
        }
    }
}

/// Set of request kinds whose fulfillment needs a live producer.
#[derive(Debug, Clone, Default)]
pub struct UpstreamGate {
    gated: HashSet<EventKind>,
}

impl UpstreamGate {
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EventKind>,
    {
        Self {
            gated: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn requires_upstream(&self, kind: &EventKind) -> bool {
        self.gated.contains(kind)
    }

    pub fn gated_kinds(&self) -> impl Iterator<Item = &EventKind> {
        self.gated.iter()
    }

    pub fn check(&self, kind: &EventKind, upstream_live: bool) -> PolicyDecision {
        if upstream_live || !self.requires_upstream(kind) {
            PolicyDecision::Pass
        } else {
            PolicyDecision::Reject(RejectReason::UpstreamUnavailable)
        }
    }
}
