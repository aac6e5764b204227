//! Wire envelope and outbound frame types
//!
//! The envelope is the routable unit of traffic: an event name that the
//! router matches on, a handler-defined body, and out-of-band metadata
//! (correlation ids and the like). Outbound traffic travels through
//! [`Frame`]s on each session's bounded output queue.

use crate::traits::error::{EngineError, Result};
use crate::traits::handler::FilterFn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Message kind used to select the router tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Text,
    Binary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::Binary => "binary",
        }
    }
}

/// The wire envelope: `{event, body, meta}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, body: Value) -> Self {
        Self {
            event: event.into(),
            body,
            meta: HashMap::new(),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(key.into(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// Deserialize an envelope out of a codec-produced value tree
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| EngineError::Codec(e.to_string()))
    }

    /// Clear for pooled reuse
    pub(crate) fn reset(&mut self) {
        self.event.clear();
        self.body = Value::Null;
        self.meta.clear();
    }
}

/// Frame kind carried on a session's output queue. Pongs never travel
/// the queue; the protocol layer answers pings itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Ping,
    Close,
}

/// One outbound unit of work: payload bytes plus a kind tag, with an
/// optional filter predicate when the frame is a broadcast
#[derive(Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
    pub(crate) filter: Option<FilterFn>,
}

impl Frame {
    pub fn text(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload,
            filter: None,
        }
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload,
            filter: None,
        }
    }

    pub fn ping() -> Self {
        Self {
            kind: FrameKind::Ping,
            payload: Vec::new(),
            filter: None,
        }
    }

    pub fn close(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Close,
            payload,
            filter: None,
        }
    }

    pub(crate) fn with_filter(mut self, filter: FilterFn) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

// Close codes defined in RFC 6455, section 11.7.
pub const CLOSE_NORMAL_CLOSURE: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
pub const CLOSE_NO_STATUS_RECEIVED: u16 = 1005;
pub const CLOSE_ABNORMAL_CLOSURE: u16 = 1006;
pub const CLOSE_INVALID_FRAME_PAYLOAD_DATA: u16 = 1007;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
pub const CLOSE_MANDATORY_EXTENSION: u16 = 1010;
pub const CLOSE_INTERNAL_SERVER_ERR: u16 = 1011;
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
pub const CLOSE_TLS_HANDSHAKE: u16 = 1015;

/// Close codes that are valid to receive from a peer. Codes outside this
/// allow-list are treated as abnormal closure causes for logging only.
pub fn is_valid_received_close_code(code: u16) -> bool {
    matches!(
        code,
        CLOSE_NORMAL_CLOSURE
            | CLOSE_GOING_AWAY
            | CLOSE_PROTOCOL_ERROR
            | CLOSE_UNSUPPORTED_DATA
            | CLOSE_INVALID_FRAME_PAYLOAD_DATA
            | CLOSE_POLICY_VIOLATION
            | CLOSE_MESSAGE_TOO_BIG
            | CLOSE_MANDATORY_EXTENSION
            | CLOSE_INTERNAL_SERVER_ERR
            | CLOSE_SERVICE_RESTART
            | CLOSE_TRY_AGAIN_LATER
    )
}

/// Format a close-frame payload from a code and reason text, matching the
/// standard wire layout (big-endian code followed by UTF-8 text).
pub fn format_close_message(code: u16, text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + text.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(text.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_deserializes_with_defaults() {
        let env: Envelope = serde_json::from_str(r#"{"event":"echo"}"#).unwrap();
        assert_eq!(env.event(), "echo");
        assert_eq!(env.body, Value::Null);
        assert!(env.meta.is_empty());
    }

    #[test]
    fn envelope_meta_round_trip() {
        let mut env = Envelope::new("node.status", json!({"cpu": 0.4}));
        env.set_meta("correlation-id", "abc-123");
        let raw = serde_json::to_vec(&env).unwrap();
        let back: Envelope = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.meta("correlation-id"), Some("abc-123"));
    }

    #[test]
    fn close_code_allow_list() {
        assert!(is_valid_received_close_code(CLOSE_NORMAL_CLOSURE));
        assert!(!is_valid_received_close_code(CLOSE_NO_STATUS_RECEIVED));
        assert!(!is_valid_received_close_code(CLOSE_ABNORMAL_CLOSURE));
        assert!(!is_valid_received_close_code(CLOSE_TLS_HANDSHAKE));
        assert!(!is_valid_received_close_code(4000));
    }

    #[test]
    fn close_message_layout() {
        let payload = format_close_message(CLOSE_GOING_AWAY, "restarting");
        assert_eq!(&payload[..2], &1001u16.to_be_bytes());
        assert_eq!(&payload[2..], b"restarting");
    }
}
