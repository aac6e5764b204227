//! Per-dispatch context and the reusable context pool
//!
//! A [`Context`] is acquired from the pool for every inbound frame,
//! populated with the raw payload and the owning session, threaded through
//! the matched handler chain, and returned to the pool when the chain
//! finishes. The pool's `get` always hands out a reset context, so "must
//! reset before reuse" is enforced by construction rather than by
//! convention.
//!
//! A handler that wants to keep the context beyond the synchronous
//! dispatch (to spawn background work, say) must call [`Context::detach`];
//! the pooled original is reset and reused underneath it.

use crate::core::engine::Engine;
use crate::core::message::{Envelope, EventKind};
use crate::core::router::{Param, Params};
use crate::core::session::Session;
use crate::traits::error::{EngineError, Result};
use crate::traits::handler::HandlerChain;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Sentinel handler index marking an aborted chain. Chains must stay
/// shorter than this, which the router enforces at registration time.
pub(crate) const ABORT_INDEX: i8 = i8::MAX / 2;

/// Per-event-invocation scratch object
pub struct Context {
    pub(crate) kind: EventKind,
    pub(crate) data: Vec<u8>,
    pub(crate) params: Params,
    pub(crate) handlers: Option<HandlerChain>,
    pub(crate) index: i8,
    pub(crate) session: Option<Arc<Session>>,
    pub(crate) engine: Option<Arc<Engine>>,
    pub(crate) envelope: Option<Envelope>,
    keys: HashMap<String, Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            kind: EventKind::Text,
            data: Vec::new(),
            params: Params::new(),
            handlers: None,
            index: -1,
            session: None,
            engine: None,
            envelope: None,
            keys: HashMap::new(),
        }
    }
}

impl Context {
    /// The kind of the frame that produced this dispatch
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Raw frame payload as received from the socket
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Parameters captured by the router match
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Look up one captured parameter by name
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// The decoded envelope, if decoding succeeded for this dispatch
    pub fn message(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// The session this dispatch belongs to
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// The engine that dispatched this event (for broadcasts from handlers)
    pub fn engine(&self) -> Option<&Arc<Engine>> {
        self.engine.as_ref()
    }

    /// Store a key/value pair scoped to this dispatch
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.keys.insert(key.into(), value);
    }

    /// Fetch a key/value pair (seeded from the session bag at dispatch)
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys.get(key)
    }

    /// Advance through the remaining handlers in the chain.
    ///
    /// Middleware calls this to run downstream handlers before its own
    /// tail logic; the dispatcher calls it once to start the chain.
    pub fn next(&mut self) {
        let chain = match &self.handlers {
            Some(chain) => Arc::clone(chain),
            None => return,
        };
        self.index += 1;
        while (self.index as usize) < chain.len() {
            let handler = Arc::clone(&chain[self.index as usize]);
            handler(self);
            self.index += 1;
        }
    }

    /// Short-circuit the chain: no handler after the current one runs
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    /// Decode the envelope out of the raw payload (memoized). Failures are
    /// routed to the engine error hook by the dispatcher; the connection
    /// stays open.
    pub(crate) fn decode_message(&mut self) -> Result<()> {
        if self.envelope.is_some() {
            return Ok(());
        }
        let engine = self
            .engine
            .clone()
            .ok_or_else(|| EngineError::Codec("context is not bound to an engine".into()))?;
        let value = engine.codec().decode(&self.data)?;
        self.envelope = Some(Envelope::from_value(value)?);
        Ok(())
    }

    /// Deserialize the envelope body. When a body codec is configured the
    /// body field is treated as an embedded blob (a JSON byte array) and
    /// decoded through that codec first.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        let envelope = self
            .envelope
            .as_ref()
            .ok_or_else(|| EngineError::Codec("message has not been decoded".into()))?;
        let body_codec = self.engine.as_ref().and_then(|e| e.body_codec());
        match body_codec {
            None => serde_json::from_value(envelope.body.clone())
                .map_err(|e| EngineError::Codec(e.to_string())),
            Some(codec) => {
                let blob: Vec<u8> = serde_json::from_value(envelope.body.clone())
                    .map_err(|e| EngineError::Codec(format!("body is not a blob: {e}")))?;
                let value = codec.decode(&blob)?;
                serde_json::from_value(value).map_err(|e| EngineError::Codec(e.to_string()))
            }
        }
    }

    /// Serialize `message` through the engine codec and enqueue it as a
    /// text frame on this session's output buffer
    pub fn write<T: Serialize>(&self, message: &T) -> Result<()> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| EngineError::Codec("context is not bound to an engine".into()))?;
        let session = self.session.as_ref().ok_or(EngineError::SessionClosed)?;
        let value =
            serde_json::to_value(message).map_err(|e| EngineError::Codec(e.to_string()))?;
        let raw = engine.codec().encode(&value)?;
        session.write(raw)
    }

    /// Enqueue raw bytes as a binary frame on this session's output buffer
    pub fn write_binary(&self, payload: Vec<u8>) -> Result<()> {
        let session = self.session.as_ref().ok_or(EngineError::SessionClosed)?;
        session.write_binary(payload)
    }

    /// Clone this context for use past the synchronous dispatch. The
    /// detached copy carries no handler chain and reads as aborted, so it
    /// cannot resume the original dispatch.
    pub fn detach(&self) -> Context {
        Context {
            kind: self.kind,
            data: self.data.clone(),
            params: self.params.clone(),
            handlers: None,
            index: ABORT_INDEX,
            session: self.session.clone(),
            engine: self.engine.clone(),
            envelope: self.envelope.clone(),
            keys: self.keys.clone(),
        }
    }

    pub(crate) fn seed_keys(&mut self, keys: HashMap<String, Value>) {
        self.keys = keys;
    }

    pub(crate) fn reset(&mut self) {
        self.kind = EventKind::Text;
        self.data.clear();
        self.params.clear();
        self.handlers = None;
        self.index = -1;
        self.session = None;
        self.engine = None;
        if let Some(envelope) = &mut self.envelope {
            envelope.reset();
        }
        self.envelope = None;
        self.keys.clear();
    }
}

/// Concurrency-safe freelist of dispatch contexts.
///
/// `get` always returns a fully reset context; `put` drops contexts on the
/// floor once the freelist is at capacity.
pub(crate) struct ContextPool {
    free: Mutex<Vec<Context>>,
    capacity: usize,
}

impl ContextPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub(crate) fn get(&self) -> Context {
        let mut ctx = self.free.lock().pop().unwrap_or_default();
        ctx.reset();
        ctx
    }

    pub(crate) fn put(&self, ctx: Context) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(ctx);
        }
    }
}
