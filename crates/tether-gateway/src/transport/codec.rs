use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message};
use bytes::Bytes;
use tether_core::protocol::Frame;

use crate::registry::Outbound;

#[derive(Debug)]
pub enum Inbound {
    /// Data frame for the registry pipeline.
    Frame(Frame),
    Ping,
    Pong,
    Close,
}

pub fn inbound(msg: Message) -> Inbound {
    match msg {
        Message::Text(s) => Inbound::Frame(Frame::Text(s)),
        Message::Binary(b) => Inbound::Frame(Frame::Binary(Bytes::from(b))),
        Message::Ping(_) => Inbound::Ping,
        Message::Pong(_) => Inbound::Pong,
        Message::Close(_) => Inbound::Close,
    }
}

/// Socket message for a queued frame, and whether it is the last one.
pub fn outbound(out: Outbound) -> (Message, bool) {
    match out {
        Outbound::Text(s) => (Message::Text(s), false),
        Outbound::Ping => (Message::Ping(Vec::new()), false),
        Outbound::Close { code, reason } => (
            Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Owned(reason),
            })),
            true,
        ),
    }
}
