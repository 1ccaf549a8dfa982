//! Envelope codec (JSON text lane).
//!
//! Decoding is total: anything that is not an object with a non-empty string
//! `type` is wrapped into a `raw` envelope carrying the best-effort parsed
//! value, or the original text when it is not JSON at all. An explicit
//! `"data": null` is kept as `Some(Value::Null)` so it survives re-encoding.

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::error::{Result, TetherError};
use crate::protocol::envelope::{Envelope, EventKind};

/// Inbound frame payload shapes accepted by the decoder.
#[derive(Debug, Clone)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Contiguous binary buffer.
    Binary(Bytes),
    /// Non-contiguous binary chunks, concatenated before decoding.
    Chunked(Vec<Bytes>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
            Frame::Chunked(parts) => parts.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pluggable envelope codec (the gateway accepts an override).
pub trait EnvelopeCodec: Send + Sync {
    /// Serialize to a text frame.
    fn encode(&self, env: &Envelope) -> Result<String>;
    /// Never fails; see module docs.
    fn decode(&self, frame: Frame) -> Envelope;
}

/// Default JSON codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, env: &Envelope) -> Result<String> {
        encode(env)
    }

    fn decode(&self, frame: Frame) -> Envelope {
        decode(frame)
    }
}

pub fn encode(env: &Envelope) -> Result<String> {
    serde_json::to_string(env)
        .map_err(|e| TetherError::Internal(format!("envelope encode failed: {e}")))
}

pub fn decode(frame: Frame) -> Envelope {
    match frame {
        Frame::Text(s) => decode_text(&s),
        Frame::Binary(b) => decode_bytes(&b),
        Frame::Chunked(parts) => {
            let mut buf = BytesMut::with_capacity(parts.iter().map(Bytes::len).sum());
            for p in &parts {
                buf.extend_from_slice(p);
            }
            decode_bytes(&buf)
        }
    }
}

fn decode_bytes(b: &[u8]) -> Envelope {
    match std::str::from_utf8(b) {
        Ok(s) => decode_text(s),
        Err(_) => Envelope::raw(Value::String(String::from_utf8_lossy(b).into_owned())),
    }
}

pub fn decode_text(text: &str) -> Envelope {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => return Envelope::raw(Value::String(text.to_owned())),
    };

    let Value::Object(mut map) = value else {
        return Envelope::raw(value);
    };

    let kind = match map.get("type").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => EventKind::from(t.to_owned()),
        _ => return Envelope::raw(Value::Object(map)),
    };

    // Unrecognized fields are ignored; ill-typed optional fields are dropped.
    Envelope {
        kind,
        timestamp: map.get("ts").and_then(Value::as_i64),
        sequence: map.get("seq").and_then(Value::as_u64),
        data: map.remove("data"),
    }
}
