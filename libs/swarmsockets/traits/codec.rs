//! Pluggable wire codecs
//!
//! Two independent codec slots exist on the engine:
//!
//! - the **envelope codec** turns raw frame payloads into
//!   [`serde_json::Value`] trees (and back) so the engine can read the
//!   `event` field for routing;
//! - the optional **body codec** interprets the envelope's `body` field as
//!   an embedded blob, enabling a double-encoding scheme (outer JSON
//!   envelope, inner arbitrary-format body).
//!
//! Decode failures are non-fatal to a connection: they surface through the
//! engine's error hook and the session keeps reading subsequent frames.

use crate::traits::error::{EngineError, Result};
use serde_json::Value;

/// Converts between raw payload bytes and a JSON value tree.
///
/// `Value` plays the role of the dynamic interchange type: the engine
/// deserializes an [`crate::core::message::Envelope`] out of whatever the
/// codec produces, so codecs never need to know the envelope layout.
pub trait Codec: Send + Sync {
    /// Short codec name, used in log lines
    fn name(&self) -> &'static str;

    /// Encode a value tree into frame payload bytes
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode frame payload bytes into a value tree
    fn decode(&self, raw: &[u8]) -> Result<Value>;
}

/// Default JSON codec backed by `serde_json`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| EngineError::Codec(e.to_string()))
    }

    fn decode(&self, raw: &[u8]) -> Result<Value> {
        serde_json::from_slice(raw).map_err(|e| EngineError::Codec(e.to_string()))
    }
}
