//! Canonical shapes of the reserved control envelopes.
//!
//! Each control type has exactly one accepted `data` layout:
//! - `auth`: `{"token": ...}` (validators see the whole `data` value)
//! - `subscribe` / `unsubscribe`: `{"stream": "<name>"}`
//! - `ping` / `pong`: no data, `ts` echoed by the pong
//! - `status`: `{"code": "<code>", "label"?: ..., "stream"?: ...}`
//! - `error`: `{"message": ..., "code": ...}`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ClientCode, Result, TetherError};
use crate::protocol::envelope::{Envelope, EventKind};

/// Orderly close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent after a failed `auth`.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code for gateway shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code for a peer evicted by a newer one in single-peer mode.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// Close code for a local idle cut-off.
pub const CLOSE_IDLE: u16 = 4001;

/// Recognized `status` codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    ProducerConnected,
    ProducerDisconnected,
    Authenticated,
    Subscribed,
    Unsubscribed,
    /// Anything else; never changes liveness.
    Other(String),
}

impl StatusKind {
    pub fn as_str(&self) -> &str {
        match self {
            StatusKind::ProducerConnected => "producer_connected",
            StatusKind::ProducerDisconnected => "producer_disconnected",
            StatusKind::Authenticated => "authenticated",
            StatusKind::Subscribed => "subscribed",
            StatusKind::Unsubscribed => "unsubscribed",
            StatusKind::Other(s) => s,
        }
    }
}

impl From<&str> for StatusKind {
    fn from(s: &str) -> Self {
        match s {
            "producer_connected" => StatusKind::ProducerConnected,
            "producer_disconnected" => StatusKind::ProducerDisconnected,
            "authenticated" => StatusKind::Authenticated,
            "subscribed" => StatusKind::Subscribed,
            "unsubscribed" => StatusKind::Unsubscribed,
            other => StatusKind::Other(other.to_string()),
        }
    }
}

/// `status` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

impl StatusPayload {
    pub fn kind(&self) -> StatusKind {
        StatusKind::from(self.code.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct StreamReq {
    stream: String,
}

/// Extract the stream name of a `subscribe`/`unsubscribe` envelope.
pub fn parse_stream(env: &Envelope) -> Result<String> {
    let data = env
        .data
        .as_ref()
        .ok_or_else(|| TetherError::BadRequest(format!("{} requires data", env.kind)))?;
    let req: StreamReq = serde_json::from_value(data.clone())
        .map_err(|e| TetherError::BadRequest(format!("{} invalid data: {e}", env.kind)))?;
    if req.stream.is_empty() {
        return Err(TetherError::BadRequest(format!("{} stream must not be empty", env.kind)));
    }
    Ok(req.stream)
}

/// Parse a `status` envelope; `None` if it is not one or the shape is off.
pub fn parse_status(env: &Envelope) -> Option<StatusPayload> {
    if env.kind != EventKind::Status {
        return None;
    }
    serde_json::from_value(env.data.clone()?).ok()
}

pub fn status(kind: StatusKind) -> Envelope {
    Envelope::with_data(EventKind::Status, json!({ "code": kind.as_str() }))
}

pub fn producer_status(connected: bool, label: Option<&str>) -> Envelope {
    let kind = if connected {
        StatusKind::ProducerConnected
    } else {
        StatusKind::ProducerDisconnected
    };
    let payload = StatusPayload {
        code: kind.as_str().to_string(),
        label: label.map(str::to_string),
        stream: None,
    };
    Envelope::with_data(EventKind::Status, json!(payload))
}

pub fn stream_ack(kind: StatusKind, stream: &str) -> Envelope {
    Envelope::with_data(
        EventKind::Status,
        json!({ "code": kind.as_str(), "stream": stream }),
    )
}

pub fn error(code: ClientCode, message: &str) -> Envelope {
    Envelope::with_data(
        EventKind::Error,
        json!({ "message": message, "code": code.as_str() }),
    )
}

pub fn error_from(err: &TetherError) -> Envelope {
    error(err.client_code(), &err.to_string())
}

/// `pong` echoing the probe's timestamp, if any.
pub fn pong_for(ping: &Envelope) -> Envelope {
    Envelope {
        timestamp: ping.timestamp,
        ..Envelope::new(EventKind::Pong)
    }
}

pub fn auth(token: &str) -> Envelope {
    Envelope::with_data(EventKind::Auth, json!({ "token": token }))
}

pub fn subscribe(stream: &str) -> Envelope {
    Envelope::with_data(EventKind::Subscribe, json!({ "stream": stream }))
}

pub fn unsubscribe(stream: &str) -> Envelope {
    Envelope::with_data(EventKind::Unsubscribe, json!({ "stream": stream }))
}

/// Router fallback carrying the original type and payload.
pub fn unhandled(env: &Envelope) -> Envelope {
    Envelope {
        timestamp: env.timestamp,
        sequence: env.sequence,
        ..Envelope::with_data(
            EventKind::Unhandled,
            json!({
                "type": env.kind.as_str(),
                "data": env.data.clone().unwrap_or(Value::Null),
            }),
        )
    }
}
