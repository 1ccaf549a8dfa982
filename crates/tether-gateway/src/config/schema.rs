use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tether_client::ClientConfig;
use tether_core::error::{Result, TetherError};
use tether_core::protocol::EventKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    /// Absent: peers start authenticated.
    #[serde(default)]
    pub auth: Option<AuthSection>,

    #[serde(default)]
    pub gating: GatingSection,

    /// Bridge towards the producer.
    #[serde(default)]
    pub upstream: Option<ClientConfig>,
}

impl GatewayConfig {
    /// Config with every section at its default; handy for tests and embedding.
    pub fn minimal() -> Self {
        Self {
            version: 1,
            gateway: GatewaySection::default(),
            auth: None,
            gating: GatingSection::default(),
            upstream: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(TetherError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.gateway.validate()?;
        if let Some(auth) = &self.auth {
            auth.validate()?;
        }
        self.gating.validate()?;
        if let Some(up) = &self.upstream {
            up.validate()
                .map_err(|e| TetherError::Config(format!("upstream: {e}")))?;
        }
        Ok(())
    }
}

/// How many peers may be attached at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    /// A new peer evicts every existing one.
    Single,
    /// Unbounded fan-out.
    #[default]
    Multi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_auto_pong")]
    pub auto_pong: bool,

    #[serde(default)]
    pub peer_mode: PeerMode,

    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            auto_pong: default_auto_pong(),
            peer_mode: PeerMode::default(),
            outbound_queue: default_outbound_queue(),
            max_frame_bytes: default_max_frame_bytes(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<SocketAddr>().is_err() {
            return Err(TetherError::Config(format!(
                "gateway.listen must be a socket address (got {})",
                self.listen
            )));
        }
        if !self.path.starts_with('/') {
            return Err(TetherError::Config("gateway.path must start with '/'".into()));
        }
        if self.outbound_queue == 0 {
            return Err(TetherError::Config("gateway.outbound_queue must be > 0".into()));
        }
        if !(256..=16 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(TetherError::Config(
                "gateway.max_frame_bytes must be between 256 and 16777216".into(),
            ));
        }
        if !(100..=120000).contains(&self.ping_interval_ms) {
            return Err(TetherError::Config(
                "gateway.ping_interval_ms must be between 100 and 120000".into(),
            ));
        }
        if !(200..=600000).contains(&self.idle_timeout_ms) {
            return Err(TetherError::Config(
                "gateway.idle_timeout_ms must be between 200 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(TetherError::Config(
                "gateway.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_path() -> String {
    "/ws".into()
}
fn default_auto_pong() -> bool {
    true
}
fn default_outbound_queue() -> usize {
    1024
}
fn default_max_frame_bytes() -> usize {
    65536
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    pub tokens: Vec<String>,
}

impl AuthSection {
    pub fn validate(&self) -> Result<()> {
        if self.tokens.is_empty() {
            return Err(TetherError::Config(
                "auth.tokens must not be empty (omit auth to disable it)".into(),
            ));
        }
        if self.tokens.iter().any(|t| t.is_empty()) {
            return Err(TetherError::Config("auth.tokens must not contain empty tokens".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatingSection {
    /// Request kinds that need a live producer.
    #[serde(default)]
    pub requires_upstream: Vec<String>,
}

impl GatingSection {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for kind in &self.requires_upstream {
            if kind.is_empty() {
                return Err(TetherError::Config(
                    "gating.requires_upstream must not contain empty kinds".into(),
                ));
            }
            if EventKind::from(kind.as_str()).is_reserved() {
                return Err(TetherError::Config(format!(
                    "gating.requires_upstream cannot gate reserved kind {kind}"
                )));
            }
            if !seen.insert(kind.as_str()) {
                return Err(TetherError::Config(format!(
                    "gating.requires_upstream lists {kind} twice"
                )));
            }
        }
        Ok(())
    }
}
