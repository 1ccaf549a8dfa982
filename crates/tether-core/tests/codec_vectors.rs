//! Envelope codec vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;
use serde_json::json;

use tether_core::protocol::{decode, encode, Envelope, EventKind, Frame};


#[test]
fn decode_vectors() {
    for v in vector_loader::load("decode.json") {
        let env = decode(v.frame.to_frame());
        let got = serde_json::to_value(&env).unwrap();
        assert_eq!(got, v.expect, "vector={}", v.description);
    }
}

#[test]
fn malformed_bytes_never_escape_as_errors() {
    let samples: Vec<Vec<u8>> = vec![
        vec![],
        vec![0x00],
        vec![0xc3, 0x28],
        b"{".to_vec(),
        b"}{".to_vec(),
        b"null".to_vec(),
        b"\"just a string\"".to_vec(),
        b"{\"type\":null}".to_vec(),
        (0u8..=255).collect(),
    ];
    for s in samples {
        let env = decode(Frame::Binary(Bytes::from(s.clone())));
        assert_eq!(env.kind, EventKind::Raw, "input={s:?}");
    }
}

#[test]
fn round_trip_preserves_type_and_data() {
    let cases = [
        Envelope::with_data("telemetry", json!({"alt": 1000, "hdg": [1, 2]})),
        Envelope::new(EventKind::Ping).at(17),
        Envelope::with_data(EventKind::Error, json!({"message": "x"})).seq(3),
        Envelope::with_data("command", json!("reboot")),
    ];
    for env in cases {
        let text = encode(&env).unwrap();
        let back = decode(Frame::Text(text));
        assert_eq!(back.kind, env.kind);
        assert_eq!(back.data, env.data);
        assert_eq!(back, env);
    }
}

#[test]
fn raw_envelope_re_encodes_as_raw() {
    let env = decode(Frame::Text("garbage".into()));
    let text = encode(&env).unwrap();
    assert_eq!(text, r#"{"type":"raw","data":"garbage"}"#);
}
