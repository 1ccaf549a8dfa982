//! Shared application state for the gateway.
//!
//! Built once at startup from a config that passes `validate()`; cheap to
//! clone into every axum handler.

use std::sync::Arc;

use tether_core::error::Result;

use crate::config::GatewayConfig;
use crate::liveness::UpstreamLiveness;
use crate::obs::metrics::GatewayMetrics;
use crate::registry::{PeerRegistry, RegistryOptions};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    registry: PeerRegistry,
    metrics: Arc<GatewayMetrics>,
}

impl AppState {
    pub fn new(cfg: GatewayConfig) -> Result<Self> {
        let opts = RegistryOptions::from_config(&cfg);
        Self::with_options(cfg, opts)
    }

    /// State with registry options adjusted in code (custom validator or codec).
    /// Hand-built configs are checked here, since the session timers rely on
    /// the validated ranges.
    pub fn with_options(cfg: GatewayConfig, opts: RegistryOptions) -> Result<Self> {
        cfg.validate()?;
        let metrics = Arc::new(GatewayMetrics::default());
        let liveness = Arc::new(UpstreamLiveness::new());
        let registry = PeerRegistry::new(opts, liveness, Arc::clone(&metrics));
        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                metrics,
            }),
        })
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> PeerRegistry {
        self.inner.registry.clone()
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn set_draining(&self) {
        self.inner.metrics.set_draining();
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::error::TetherError;

    #[test]
    fn unvalidated_timers_are_rejected() {
        let mut cfg = GatewayConfig::minimal();
        cfg.gateway.ping_interval_ms = 0;
        assert!(matches!(AppState::new(cfg), Err(TetherError::Config(_))));

        let mut cfg = GatewayConfig::minimal();
        cfg.gateway.idle_timeout_ms = cfg.gateway.ping_interval_ms;
        assert!(AppState::with_options(cfg, RegistryOptions::default()).is_err());
    }

    #[test]
    fn minimal_config_builds_state() {
        let state = match AppState::new(GatewayConfig::minimal()) {
            Ok(s) => s,
            Err(e) => panic!("minimal config rejected: {e}"),
        };
        assert_eq!(state.registry().peer_count(), 0);
        assert!(!state.is_draining());
    }
}
