//! Client connection settings.
//!
//! Deserializable (strict) so the gateway can embed it as its `upstream:`
//! section; also constructible in code with the builder methods.

use std::time::Duration;

use serde::Deserialize;
use tether_core::error::{Result, TetherError};

use crate::backoff::Backoff;

/// Upper bound of the idle watchdog period.
const WATCHDOG_MAX_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Peer address (`ws://` or `wss://`).
    pub url: String,

    /// Offered sub-protocols (`Sec-WebSocket-Protocol`).
    #[serde(default)]
    pub protocols: Vec<String>,

    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// `null` disables the idle watchdog.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            backoff_factor: default_backoff_factor(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }

    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auto_reconnect(mut self, on: bool) -> Self {
        self.auto_reconnect = on;
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_ms = base.as_millis() as u64;
        self.reconnect_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(TetherError::Config("url must not be empty".into()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(TetherError::Config(format!(
                "url must use ws:// or wss:// (got {})",
                self.url
            )));
        }
        if self.reconnect_base_ms == 0 {
            return Err(TetherError::Config("reconnect_base_ms must be > 0".into()));
        }
        if self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(TetherError::Config(
                "reconnect_max_ms must be >= reconnect_base_ms".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(TetherError::Config("backoff_factor must be >= 1.0".into()));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(TetherError::Config(
                "idle_timeout_ms must be > 0 (use null to disable)".into(),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
            self.backoff_factor,
        )
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Watchdog period: `min(5s, idle_timeout)`.
    pub fn watchdog_period(&self) -> Option<Duration> {
        self.idle_timeout().map(|t| t.min(WATCHDOG_MAX_PERIOD))
    }
}

fn default_auto_reconnect() -> bool {
    true
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    30000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_idle_timeout_ms() -> Option<u64> {
    Some(15000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ClientConfig::new("ws://127.0.0.1:9000/telemetry").validate().is_ok());
    }

    #[test]
    fn rejects_inverted_delays_and_bad_factor() {
        let cfg = ClientConfig::new("ws://x")
            .with_reconnect_delays(Duration::from_secs(10), Duration::from_secs(1));
        assert!(cfg.validate().is_err());
        assert!(ClientConfig::new("ws://x").with_backoff_factor(0.5).validate().is_err());
        assert!(ClientConfig::new("http://x").validate().is_err());
    }

    #[test]
    fn watchdog_period_is_capped_at_five_seconds() {
        let long = ClientConfig::new("ws://x").with_idle_timeout(Some(Duration::from_secs(60)));
        assert_eq!(long.watchdog_period(), Some(Duration::from_secs(5)));
        let short = ClientConfig::new("ws://x").with_idle_timeout(Some(Duration::from_secs(2)));
        assert_eq!(short.watchdog_period(), Some(Duration::from_secs(2)));
        let off = ClientConfig::new("ws://x").with_idle_timeout(None);
        assert_eq!(off.watchdog_period(), None);
    }

    #[test]
    fn yaml_fills_defaults_and_null_disables_watchdog() {
        let cfg: ClientConfig = serde_yaml::from_str(
            "url: \"ws://127.0.0.1:9000/telemetry\"\nidle_timeout_ms: null\n",
        )
        .unwrap();
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.reconnect_base_ms, 1000);
        assert_eq!(cfg.reconnect_max_ms, 30000);
        assert_eq!(cfg.idle_timeout(), None);

        let typo = serde_yaml::from_str::<ClientConfig>("url: \"ws://x\"\nbackof_factor: 2.0\n");
        assert!(typo.is_err());
    }
}
