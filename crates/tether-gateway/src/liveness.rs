//! Process-wide upstream liveness: one boolean plus the producer's label.
//!
//! Many readers (the request gate), one writer path: the registry's status
//! observation. Unrecognized status codes leave the flag untouched.

use std::sync::Mutex;

use tether_core::protocol::control::{StatusKind, StatusPayload};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessSnapshot {
    pub live: bool,
    pub label: Option<String>,
}

#[derive(Debug, Default)]
pub struct UpstreamLiveness {
    state: Mutex<LivenessSnapshot>,
}

impl UpstreamLiveness {
    /// Starts not live.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.snapshot().live
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Apply one status payload. Returns `true` if the flag flipped.
    pub(crate) fn apply(&self, status: &StatusPayload) -> bool {
        let live = match status.kind() {
            StatusKind::ProducerConnected => true,
            StatusKind::ProducerDisconnected => false,
            _ => return false,
        };
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let flipped = state.live != live;
        state.live = live;
        if status.label.is_some() || !live {
            state.label = status.label.clone();
        }
        flipped
    }
}
