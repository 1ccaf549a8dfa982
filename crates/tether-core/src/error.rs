//! Shared error type across tether crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed control message.
    BadRequest,
    /// Credential rejected by the auth validator.
    AuthFailed,
    /// Envelope other than `auth` received before authentication.
    Unauthenticated,
    /// Gated request while the producer is not connected.
    UpstreamUnavailable,
    /// Local send attempted on a connection that is not open.
    NotOpen,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON error envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::AuthFailed => "AUTH_FAILED",
            ClientCode::Unauthenticated => "UNAUTHENTICATED",
            ClientCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ClientCode::NotOpen => "NOT_OPEN",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, TetherError>;

/// Unified error type used by core, client and gateway.
#[derive(Debug, Error)]
pub enum TetherError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("auth failed")]
    AuthFailed,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("upstream not connected")]
    UpstreamUnavailable,
    #[error("connection not open")]
    NotOpen,
    #[error("transport: {0}")]
    Transport(String),
    #[error("config: {0}")]
    Config(String),
    #[error("handler: {0}")]
    Handler(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl TetherError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            TetherError::BadRequest(_) | TetherError::Config(_) => ClientCode::BadRequest,
            TetherError::AuthFailed => ClientCode::AuthFailed,
            TetherError::Unauthenticated => ClientCode::Unauthenticated,
            TetherError::UpstreamUnavailable => ClientCode::UpstreamUnavailable,
            TetherError::NotOpen => ClientCode::NotOpen,
            TetherError::Transport(_) | TetherError::Handler(_) | TetherError::Internal(_) => {
                ClientCode::Internal
            }
        }
    }
}
