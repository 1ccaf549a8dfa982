//! Gateway config loader (strict parsing).

pub mod schema;

use std::fs;

use tether_core::error::{Result, TetherError};

pub use schema::{AuthSection, GatewayConfig, GatewaySection, GatingSection, PeerMode};

/// Default config path when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "tether.yaml";

pub fn load_from_file(path: &str) -> Result<GatewayConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| TetherError::Config(format!("read {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = serde_yaml::from_str(s)
        .map_err(|e| TetherError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
