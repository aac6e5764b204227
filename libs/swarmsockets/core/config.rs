//! Engine configuration
//!
//! A declarative options struct with builder-style setters. Defaults match
//! the values the engine has always shipped with: 10s write deadline, 60s
//! pong wait, pings at nine tenths of the pong wait, 512-byte inbound
//! frames, 256-frame output buffers.
//!
//! Validation happens once in [`crate::core::engine::Engine::new`] and is
//! fatal: configuration is fixed before serving starts, so a bad value is
//! a programming error, not a runtime condition.

use crate::traits::codec::{Codec, JsonCodec};
use std::sync::Arc;
use std::time::Duration;

/// Cross-origin accept policy applied during the upgrade handshake.
///
/// Requests without an `Origin` header (non-browser clients) are always
/// accepted; authentication is the caller's concern.
#[derive(Debug, Clone)]
pub enum OriginPolicy {
    /// Accept any origin
    AllowAny,
    /// Accept only the listed origins (exact match)
    AllowList(Vec<String>),
}

/// What to do when a session's output buffer is full on enqueue.
///
/// The original behavior silently drops the frame; disconnecting slow
/// consumers is the common real-world alternative, so the choice is
/// explicit configuration rather than a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the frame and log the overflow; the producer sees no error
    DropFrame,
    /// Drop the frame and tear the session down
    Disconnect,
}

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Deadline for a single socket write
    pub write_wait: Duration,
    /// How long to wait for any inbound traffic (pongs included) before
    /// the read pump gives up on the connection
    pub pong_wait: Duration,
    /// Interval between server pings; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Maximum size in bytes of one inbound message
    pub max_message_size: usize,
    /// Frames buffered per session before the overflow policy applies
    pub message_buffer_size: usize,
    /// Socket write buffer size handed to the protocol layer
    pub write_buffer_size: usize,
    /// Upper bound on the protocol layer's write buffer
    pub max_write_buffer_size: usize,
    /// Cross-origin accept policy for the upgrade handshake
    pub origin_policy: OriginPolicy,
    /// Slow-consumer handling for full output buffers
    pub overflow_policy: OverflowPolicy,
    /// Worker threads for broadcast fan-out
    pub broadcast_workers: usize,
    /// Queued fan-out jobs before work runs inline on the hub loop
    pub broadcast_queue_depth: usize,
    /// Envelope codec (JSON unless replaced)
    pub codec: Arc<dyn Codec>,
    /// Optional second codec for the envelope body blob
    pub body_codec: Option<Arc<dyn Codec>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
            message_buffer_size: 256,
            write_buffer_size: 1024,
            max_write_buffer_size: 64 * 1024,
            origin_policy: OriginPolicy::AllowAny,
            overflow_policy: OverflowPolicy::DropFrame,
            broadcast_workers: 4,
            broadcast_queue_depth: 1024,
            codec: Arc::new(JsonCodec),
            body_codec: None,
        }
    }
}

impl EngineConfig {
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self
    }

    pub fn with_ping_period(mut self, ping_period: Duration) -> Self {
        self.ping_period = ping_period;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_message_buffer_size(mut self, frames: usize) -> Self {
        self.message_buffer_size = frames;
        self
    }

    pub fn with_origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_broadcast_workers(mut self, workers: usize) -> Self {
        self.broadcast_workers = workers;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_body_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.body_codec = Some(codec);
        self
    }

    /// Panics on invalid combinations. Called once at engine construction;
    /// configuration is immutable afterwards.
    pub(crate) fn validate(&self) {
        assert!(
            self.ping_period < self.pong_wait,
            "ping_period ({:?}) must be shorter than pong_wait ({:?})",
            self.ping_period,
            self.pong_wait
        );
        assert!(self.message_buffer_size > 0, "message_buffer_size must be > 0");
        assert!(self.max_message_size > 0, "max_message_size must be > 0");
        assert!(self.broadcast_workers > 0, "broadcast_workers must be > 0");
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("write_wait", &self.write_wait)
            .field("pong_wait", &self.pong_wait)
            .field("ping_period", &self.ping_period)
            .field("max_message_size", &self.max_message_size)
            .field("message_buffer_size", &self.message_buffer_size)
            .field("origin_policy", &self.origin_policy)
            .field("overflow_policy", &self.overflow_policy)
            .field("codec", &self.codec.name())
            .field("body_codec", &self.body_codec.as_ref().map(|c| c.name()))
            .finish()
    }
}
