//! Route groups: shared event-path prefixes and shared middleware
//!
//! A group snapshots the engine's global middleware at creation time and
//! layers its own on top; routes registered through the group get the
//! joined prefix and the accumulated chain. Groups nest.

use crate::core::context::ABORT_INDEX;
use crate::core::engine::Engine;
use crate::core::message::EventKind;
use crate::traits::handler::{EventHandler, HandlerChain};
use std::sync::Arc;

/// A set of routes under a common dot-delimited prefix
pub struct RouterGroup<'e> {
    engine: &'e Engine,
    base: String,
    handlers: Vec<EventHandler>,
}

impl<'e> RouterGroup<'e> {
    pub(crate) fn new(engine: &'e Engine, prefix: &str, handlers: Vec<EventHandler>) -> Self {
        assert!(!prefix.is_empty(), "group prefix must not be empty");
        Self {
            engine,
            base: prefix.to_string(),
            handlers,
        }
    }

    /// Append a middleware to this group (and to child groups created
    /// afterwards)
    pub fn use_middleware(&mut self, handler: EventHandler) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    /// Open a nested group; its prefix and middleware stack extend this
    /// group's
    pub fn group(&self, prefix: &str) -> RouterGroup<'e> {
        RouterGroup::new(self.engine, &self.join(prefix), self.handlers.clone())
    }

    /// Register a handler chain for an event path relative to the group
    /// prefix, on one message kind
    pub fn handle(&self, kind: EventKind, event: &str, handlers: &[EventHandler]) {
        let chain = self.combine(handlers);
        self.engine.add_route_raw(kind, &self.join(event), chain);
    }

    /// Register handlers for text frames
    pub fn text(&self, event: &str, handlers: &[EventHandler]) {
        self.handle(EventKind::Text, event, handlers);
    }

    /// Register handlers for binary frames
    pub fn binary(&self, event: &str, handlers: &[EventHandler]) {
        self.handle(EventKind::Binary, event, handlers);
    }

    /// Register handlers on both message kinds at once
    pub fn any(&self, event: &str, handlers: &[EventHandler]) {
        let chain = self.combine(handlers);
        let path = self.join(event);
        self.engine
            .add_route_raw(EventKind::Text, &path, Arc::clone(&chain));
        self.engine.add_route_raw(EventKind::Binary, &path, chain);
    }

    fn join(&self, event: &str) -> String {
        assert!(!event.is_empty(), "event path must not be empty");
        format!("{}.{}", self.base, event)
    }

    fn combine(&self, handlers: &[EventHandler]) -> HandlerChain {
        let mut all = Vec::with_capacity(self.handlers.len() + handlers.len());
        all.extend(self.handlers.iter().cloned());
        all.extend(handlers.iter().cloned());
        assert!(
            all.len() < ABORT_INDEX as usize,
            "too many handlers in combined chain"
        );
        all.into()
    }
}
