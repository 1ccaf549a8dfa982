//! Wire envelope: `{ "type", "ts"?, "seq"?, "data"? }`.
//!
//! `type` is carried as an [`EventKind`] so routing tables can match on the
//! reserved control kinds exhaustively; any other string lands in
//! [`EventKind::Custom`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing key of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Client credential presentation.
    Auth,
    /// Add a stream to the connection's subscription set.
    Subscribe,
    /// Remove a stream from the connection's subscription set.
    Unsubscribe,
    /// Liveness probe.
    Ping,
    /// Liveness probe answer.
    Pong,
    /// Producer status or gateway acknowledgement.
    Status,
    /// Error report.
    Error,
    /// Codec fallback for frames without a usable `type`.
    Raw,
    /// Router fallback for kinds with no registered handler.
    Unhandled,
    /// Application kind (e.g. `telemetry`, `command`).
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Auth => "auth",
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Ping => "ping",
            EventKind::Pong => "pong",
            EventKind::Status => "status",
            EventKind::Error => "error",
            EventKind::Raw => "raw",
            EventKind::Unhandled => "unhandled",
            EventKind::Custom(s) => s,
        }
    }

    /// True for the kinds the protocol layer itself produces or consumes.
    pub fn is_reserved(&self) -> bool {
        !matches!(self, EventKind::Custom(_))
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "auth" => EventKind::Auth,
            "subscribe" => EventKind::Subscribe,
            "unsubscribe" => EventKind::Unsubscribe,
            "ping" => EventKind::Ping,
            "pong" => EventKind::Pong,
            "status" => EventKind::Status,
            "error" => EventKind::Error,
            "raw" => EventKind::Raw,
            "unhandled" => EventKind::Unhandled,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match EventKind::from(s.as_str()) {
            EventKind::Custom(_) => EventKind::Custom(s),
            known => known,
        }
    }
}

impl From<EventKind> for String {
    fn from(k: EventKind) -> Self {
        match k {
            EventKind::Custom(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing key (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Producer-assigned unix milliseconds.
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Per-connection sequence number (observability only).
    #[serde(rename = "seq", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Arbitrary payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<EventKind>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: None,
            sequence: None,
            data: None,
        }
    }

    pub fn with_data(kind: impl Into<EventKind>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(kind)
        }
    }

    /// Codec fallback wrapper.
    pub fn raw(data: Value) -> Self {
        Self::with_data(EventKind::Raw, data)
    }

    pub fn at(mut self, ts: i64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Stamp the current wall-clock time.
    pub fn stamped(self) -> Self {
        self.at(unix_millis())
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.sequence = Some(seq);
        self
    }

    pub fn type_str(&self) -> &str {
        self.kind.as_str()
    }

    /// String field of an object payload.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }
}

/// Wall-clock unix time in milliseconds (0 if the clock is before the epoch).
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
