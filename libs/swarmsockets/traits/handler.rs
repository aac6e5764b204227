//! Handler and lifecycle-hook signatures
//!
//! Event handlers are plain synchronous closures threaded through a
//! [`Context`]. A handler that needs to outlive its dispatch (for example
//! to spawn a background task) must call [`Context::detach`] first; the
//! pooled context is reset and reused as soon as the chain returns.

use crate::core::context::Context;
use crate::core::session::Session;
use crate::traits::error::{EngineError, Result};
use std::sync::Arc;

/// One element of a handler chain (middleware or terminal handler)
pub type EventHandler = Arc<dyn Fn(&mut Context) + Send + Sync>;

/// An ordered middleware + terminal chain, shared by the router tree and
/// every dispatch that matches it
pub type HandlerChain = Arc<[EventHandler]>;

/// Hook invoked with the session on connect/disconnect/pong
pub type SessionHook = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

/// Hook invoked when the peer sends a close frame (code, reason text)
pub type CloseHook = Arc<dyn Fn(&Arc<Session>, u16, &str) -> Result<()> + Send + Sync>;

/// Hook invoked when an inbound frame fails to decode
pub type ErrorHook = Arc<dyn Fn(&mut Context, &EngineError) + Send + Sync>;

/// Broadcast filter predicate; a session receives the frame only when the
/// predicate returns true for it
pub type FilterFn = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// Build a [`HandlerChain`] from a slice of handlers
pub fn chain_from(handlers: &[EventHandler]) -> HandlerChain {
    handlers.to_vec().into()
}
