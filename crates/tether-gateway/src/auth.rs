//! Peer authentication.
//!
//! A validator sees the whole `data` of the peer's `auth` envelope plus the
//! peer's metadata, and either accepts or returns an error (`AuthFailed`).

use std::collections::HashSet;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::Value;
use tether_core::error::{Result, TetherError};

use crate::registry::PeerId;

/// Accept-time metadata of one peer.
#[derive(Debug, Clone)]
pub struct PeerMeta {
    pub id: PeerId,
    pub remote: Option<SocketAddr>,
    pub path: String,
}

#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn validate(&self, credential: &Value, meta: &PeerMeta) -> Result<()>;
}

/// Accepts `{"token": "<t>"}` when `t` is in a fixed set.
#[derive(Debug, Clone)]
pub struct StaticTokenValidator {
    tokens: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AuthValidator for StaticTokenValidator {
    async fn validate(&self, credential: &Value, meta: &PeerMeta) -> Result<()> {
        let token = credential
            .get("token")
            .and_then(Value::as_str)
            .ok_or(TetherError::AuthFailed)?;
        if self.tokens.contains(token) {
            Ok(())
        } else {
            tracing::debug!(peer = meta.id, "unknown token");
            Err(TetherError::AuthFailed)
        }
    }
}
