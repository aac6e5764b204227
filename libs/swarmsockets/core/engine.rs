//! Engine: the public facade tying router, hub, sessions and hooks together
//!
//! One engine owns one hub, one pair of route trees, one context pool and
//! the lifecycle hook slots. Routes and hooks are registered up front;
//! [`Engine::serve`] is then called once per accepted connection and runs
//! that connection's full lifecycle (handshake, registration, pumps,
//! teardown) to completion.
//!
//! `serve` is generic over the byte stream, so anything that is
//! `AsyncRead + AsyncWrite` can back a connection: a TCP socket in
//! production, an in-memory duplex pipe in tests.

use crate::core::config::{EngineConfig, OriginPolicy};
use crate::core::context::{Context, ContextPool, ABORT_INDEX};
use crate::core::hub::Hub;
use crate::core::message::{EventKind, Frame};
use crate::core::router::Router;
use crate::core::session::Session;
use crate::traits::codec::Codec;
use crate::traits::error::{EngineError, Result};
use crate::traits::handler::{
    CloseHook, ErrorHook, EventHandler, FilterFn, HandlerChain, SessionHook,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, warn};

/// Event-routing WebSocket engine
pub struct Engine {
    config: EngineConfig,
    hub: Arc<Hub>,
    router: RwLock<Router>,
    middlewares: RwLock<Vec<EventHandler>>,
    no_route: RwLock<Option<HandlerChain>>,
    pool: ContextPool,
    next_session_id: AtomicU64,
    connect: RwLock<Option<SessionHook>>,
    disconnect: RwLock<Option<SessionHook>>,
    pong: RwLock<Option<SessionHook>>,
    close: RwLock<Option<CloseHook>>,
    error: RwLock<Option<ErrorHook>>,
}

impl Engine {
    /// Build an engine from explicit configuration. Must be called from
    /// within a tokio runtime; panics on invalid configuration.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        config.validate();
        let hub = Hub::spawn(config.broadcast_workers, config.broadcast_queue_depth);
        Arc::new(Self {
            config,
            hub,
            router: RwLock::new(Router::default()),
            middlewares: RwLock::new(Vec::new()),
            no_route: RwLock::new(None),
            pool: ContextPool::new(64),
            next_session_id: AtomicU64::new(1),
            connect: RwLock::new(None),
            disconnect: RwLock::new(None),
            pong: RwLock::new(None),
            close: RwLock::new(None),
            error: RwLock::new(None),
        })
    }

    /// Build an engine with default configuration
    pub fn with_defaults() -> Arc<Self> {
        Self::new(EngineConfig::default())
    }

    // ----- route registration -----

    /// Append a middleware applied to every route registered after this
    /// call (and to the no-route chain)
    pub fn use_middleware(&self, handler: EventHandler) {
        self.middlewares.write().push(handler);
    }

    /// Register a handler chain for an event path on one message kind
    pub fn handle(&self, kind: EventKind, event: &str, handlers: &[EventHandler]) {
        let chain = self.combine(handlers);
        self.router.write().add_route(kind, event, chain);
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
        let mut router = self.router.write();
        router.add_route(EventKind::Text, event, Arc::clone(&chain));
        router.add_route(EventKind::Binary, event, chain);
    }

    /// Fallback chain for events with no matching route. Without one,
    /// unroutable events are logged and dropped.
    pub fn no_route(&self, handlers: &[EventHandler]) {
        *self.no_route.write() = Some(self.combine(handlers));
    }

    /// Open a route group under a shared path prefix
    pub fn group(&self, prefix: &str) -> crate::core::group::RouterGroup<'_> {
        crate::core::group::RouterGroup::new(self, prefix, self.middlewares.read().clone())
    }

    fn combine(&self, handlers: &[EventHandler]) -> HandlerChain {
        let middlewares = self.middlewares.read();
        let mut all = Vec::with_capacity(middlewares.len() + handlers.len());
        all.extend(middlewares.iter().cloned());
        all.extend(handlers.iter().cloned());
        assert!(
            all.len() < ABORT_INDEX as usize,
            "too many handlers in combined chain"
        );
        all.into()
    }

    pub(crate) fn add_route_raw(&self, kind: EventKind, path: &str, chain: HandlerChain) {
        self.router.write().add_route(kind, path, chain);
    }

    // ----- lifecycle hooks -----

    /// Hook invoked after a session is registered with the hub
    pub fn on_connect(&self, hook: SessionHook) {
        if self.connect.write().replace(hook).is_some() {
            warn!("connect hook replaced");
        }
    }

    /// Hook invoked after a session is torn down and unregistered
    pub fn on_disconnect(&self, hook: SessionHook) {
        if self.disconnect.write().replace(hook).is_some() {
            warn!("disconnect hook replaced");
        }
    }

    /// Hook invoked on every pong received from the peer
    pub fn on_pong(&self, hook: SessionHook) {
        if self.pong.write().replace(hook).is_some() {
            warn!("pong hook replaced");
        }
    }

    /// Hook invoked when the peer sends a close frame
    pub fn on_close(&self, hook: CloseHook) {
        if self.close.write().replace(hook).is_some() {
            warn!("close hook replaced");
        }
    }

    /// Hook invoked when an inbound frame cannot be decoded
    pub fn on_error(&self, hook: ErrorHook) {
        if self.error.write().replace(hook).is_some() {
            warn!("error hook replaced");
        }
    }

    pub(crate) fn pong_hook(&self) -> Option<SessionHook> {
        self.pong.read().clone()
    }

    pub(crate) fn close_hook(&self) -> Option<CloseHook> {
        self.close.read().clone()
    }

    // ----- accessors -----

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.config.codec)
    }

    pub(crate) fn body_codec(&self) -> Option<Arc<dyn Codec>> {
        self.config.body_codec.clone()
    }

    /// Number of currently connected sessions
    pub fn len(&self) -> usize {
        self.hub.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hub.len() == 0
    }

    /// Whether the engine has been shut down
    pub fn is_closed(&self) -> bool {
        self.hub.closed()
    }

    // ----- serving -----

    /// Run one connection to completion: WebSocket handshake, hub
    /// registration, both pumps, and teardown. Returns once the connection
    /// is fully torn down.
    pub async fn serve<S>(self: &Arc<Self>, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.serve_with_keys(stream, HashMap::new()).await
    }

    /// Like [`Engine::serve`], seeding the session's key/value bag with
    /// values collected during the outer HTTP handshake (auth claims,
    /// client metadata)
    pub async fn serve_with_keys<S>(
        self: &Arc<Self>,
        stream: S,
        keys: HashMap<String, Value>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_closed() {
            return Err(EngineError::EngineClosed);
        }

        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_message_size),
            write_buffer_size: self.config.write_buffer_size,
            max_write_buffer_size: self.config.max_write_buffer_size,
            ..Default::default()
        };

        let policy = self.config.origin_policy.clone();
        let callback = move |req: &Request, response: Response| {
            if origin_allowed(&policy, req) {
                Ok(response)
            } else {
                warn!("rejected handshake from disallowed origin");
                let mut resp = ErrorResponse::new(Some("origin not allowed".to_string()));
                *resp.status_mut() = StatusCode::FORBIDDEN;
                Err(resp)
            }
        };

        let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;
        let (sink, read) = futures::StreamExt::split(ws);

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (session, output_rx) = Session::new(
            id,
            keys,
            self.config.message_buffer_size,
            self.config.overflow_policy,
        );
        self.hub.register(Arc::clone(&session)).await?;
        debug!(session = id, "session connected");

        if let Some(hook) = self.connect.read().clone() {
            hook(&session);
        }

        let writer = tokio::spawn(Session::write_pump(
            Arc::clone(&session),
            sink,
            output_rx,
            self.config.write_wait,
            self.config.ping_period,
        ));

        session.read_pump(self, read).await;

        // Read side is done for whatever reason; take the write pump down
        // with it and deregister.
        session.force_close();
        let _ = writer.await;
        let _ = self.hub.unregister(id).await;
        debug!(session = id, "session disconnected");

        if let Some(hook) = self.disconnect.read().clone() {
            hook(&session);
        }
        Ok(())
    }

    // ----- dispatch -----

    /// Route one inbound data frame through the matching handler chain.
    /// Called by the read pump for every text/binary frame.
    pub(crate) fn dispatch(self: &Arc<Self>, session: &Arc<Session>, kind: EventKind, data: Vec<u8>) {
        let mut ctx = self.pool.get();
        ctx.kind = kind;
        ctx.data = data;
        ctx.session = Some(Arc::clone(session));
        ctx.engine = Some(Arc::clone(self));
        ctx.seed_keys(session.keys_snapshot());
        self.message_handler(&mut ctx);
        self.pool.put(ctx);
    }

    fn message_handler(&self, ctx: &mut Context) {
        if let Err(e) = ctx.decode_message() {
            self.fire_error(ctx, &e);
            return;
        }
        let event = match ctx.message() {
            Some(envelope) => envelope.event().to_string(),
            None => return,
        };

        match self.router.read().lookup(ctx.kind, &event) {
            Some((chain, params)) => {
                ctx.params = params;
                ctx.handlers = Some(chain);
            }
            None => match self.no_route.read().clone() {
                Some(chain) => ctx.handlers = Some(chain),
                None => {
                    debug!(event, kind = ctx.kind().as_str(), "no route for event");
                    return;
                }
            },
        }
        ctx.next();
    }

    fn fire_error(&self, ctx: &mut Context, err: &EngineError) {
        warn!(error = %err, "failed to decode inbound frame");
        if let Some(hook) = self.error.read().clone() {
            hook(ctx, err);
        }
    }

    // ----- broadcast -----

    /// Broadcast a text frame to every connected session
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<()> {
        self.hub.broadcast(Frame::text(payload)).await
    }

    /// Broadcast a binary frame to every connected session
    pub async fn broadcast_binary(&self, payload: Vec<u8>) -> Result<()> {
        self.hub.broadcast(Frame::binary(payload)).await
    }

    /// Broadcast a text frame to the sessions the predicate accepts
    pub async fn broadcast_filter(&self, payload: Vec<u8>, filter: FilterFn) -> Result<()> {
        self.hub
            .broadcast(Frame::text(payload).with_filter(filter))
            .await
    }

    /// Broadcast a binary frame to the sessions the predicate accepts
    pub async fn broadcast_binary_filter(&self, payload: Vec<u8>, filter: FilterFn) -> Result<()> {
        self.hub
            .broadcast(Frame::binary(payload).with_filter(filter))
            .await
    }

    /// Broadcast a text frame to everyone except the given session
    pub async fn broadcast_others(&self, payload: Vec<u8>, session: &Arc<Session>) -> Result<()> {
        let skip = session.id();
        self.broadcast_filter(payload, Arc::new(move |s: &Session| s.id() != skip))
            .await
    }

    /// Broadcast a text frame to an explicit set of session ids
    pub async fn broadcast_multiple(&self, payload: Vec<u8>, ids: &[u64]) -> Result<()> {
        let ids: HashSet<u64> = ids.iter().copied().collect();
        self.broadcast_filter(payload, Arc::new(move |s: &Session| ids.contains(&s.id())))
            .await
    }

    // ----- shutdown -----

    /// Shut the engine down: every session gets a close frame, the hub
    /// stops, and further broadcasts/serves fail. Terminal.
    pub async fn close(&self) -> Result<()> {
        self.hub.exit(Frame::close(Vec::new())).await
    }

    /// Shut down with an explicit close payload (see
    /// [`crate::core::message::format_close_message`])
    pub async fn close_with_payload(&self, payload: Vec<u8>) -> Result<()> {
        self.hub.exit(Frame::close(payload)).await
    }
}

fn origin_allowed(policy: &OriginPolicy, req: &Request) -> bool {
    let origin = match req.headers().get("Origin").and_then(|v| v.to_str().ok()) {
        // Non-browser clients send no Origin header.
        None => return true,
        Some(origin) => origin,
    };
    match policy {
        OriginPolicy::AllowAny => true,
        OriginPolicy::AllowList(allowed) => allowed.iter().any(|a| a == origin),
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("sessions", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::OverflowPolicy;
    use parking_lot::Mutex;
    use serde_json::json;

    fn dispatch_json(engine: &Arc<Engine>, session: &Arc<Session>, value: serde_json::Value) {
        engine.dispatch(session, EventKind::Text, serde_json::to_vec(&value).unwrap());
    }

    fn test_session() -> (Arc<Session>, tokio::sync::mpsc::Receiver<Frame>) {
        Session::new(7, HashMap::new(), 8, OverflowPolicy::DropFrame)
    }

    #[tokio::test]
    async fn dispatch_routes_to_matching_handler() {
        let engine = Engine::with_defaults();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            engine.text(
                "node.:id.status",
                &[Arc::new(move |ctx: &mut Context| {
                    seen.lock().push(ctx.param("id").unwrap_or("").to_string());
                })],
            );
        }

        let (session, _rx) = test_session();
        dispatch_json(
            &engine,
            &session,
            json!({"event": "node.crawler-2.status", "body": {"cpu": 0.3}}),
        );
        assert_eq!(*seen.lock(), vec!["crawler-2"]);
    }

    #[tokio::test]
    async fn unroutable_event_falls_back_to_no_route_chain() {
        let engine = Engine::with_defaults();
        let fallback_events = Arc::new(Mutex::new(Vec::new()));
        {
            let fallback_events = fallback_events.clone();
            engine.no_route(&[Arc::new(move |ctx: &mut Context| {
                let event = ctx.message().map(|m| m.event().to_string());
                fallback_events.lock().push(event);
            })]);
        }
        engine.text("known", &[Arc::new(|_ctx| {})]);

        let (session, _rx) = test_session();
        dispatch_json(&engine, &session, json!({"event": "ghost.event"}));
        assert_eq!(
            *fallback_events.lock(),
            vec![Some("ghost.event".to_string())]
        );
    }

    #[tokio::test]
    async fn unroutable_event_without_fallback_is_dropped() {
        let engine = Engine::with_defaults();
        let (session, _rx) = test_session();
        // No routes, no no_route chain: nothing happens, nothing panics.
        dispatch_json(&engine, &session, json!({"event": "ghost"}));
    }

    #[tokio::test]
    async fn malformed_frame_reaches_error_hook_and_connection_survives() {
        let engine = Engine::with_defaults();
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            engine.on_error(Arc::new(move |_ctx: &mut Context, err: &EngineError| {
                errors.lock().push(err.to_string());
            }));
        }

        let (session, _rx) = test_session();
        engine.dispatch(&session, EventKind::Text, b"not json at all".to_vec());

        assert_eq!(errors.lock().len(), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn middleware_registered_before_route_runs_first() {
        let engine = Engine::with_defaults();
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = order.clone();
            engine.use_middleware(Arc::new(move |_ctx: &mut Context| {
                order.lock().push("middleware");
            }));
        }
        {
            let order = order.clone();
            engine.text(
                "echo",
                &[Arc::new(move |_ctx: &mut Context| {
                    order.lock().push("handler");
                })],
            );
        }

        let (session, _rx) = test_session();
        dispatch_json(&engine, &session, json!({"event": "echo"}));
        assert_eq!(*order.lock(), vec!["middleware", "handler"]);
    }

    #[tokio::test]
    async fn aborting_middleware_blocks_the_terminal_handler() {
        let engine = Engine::with_defaults();
        let reached = Arc::new(Mutex::new(false));
        engine.use_middleware(Arc::new(|ctx: &mut Context| ctx.abort()));
        {
            let reached = reached.clone();
            engine.text(
                "guarded",
                &[Arc::new(move |_ctx: &mut Context| {
                    *reached.lock() = true;
                })],
            );
        }

        let (session, _rx) = test_session();
        dispatch_json(&engine, &session, json!({"event": "guarded"}));
        assert!(!*reached.lock());
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let engine = Engine::with_defaults();
        engine.close().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(engine.is_closed());
        assert!(matches!(
            engine.close().await,
            Err(EngineError::EngineAlreadyClosed)
        ));
        assert!(matches!(
            engine.broadcast(Vec::new()).await,
            Err(EngineError::EngineClosed)
        ));
    }

    #[test]
    fn origin_allow_list_is_exact_match() {
        let policy = OriginPolicy::AllowList(vec!["https://fleet.example".into()]);
        let with_origin = |origin: &str| {
            Request::builder()
                .uri("ws://localhost/ws")
                .header("Origin", origin)
                .body(())
                .unwrap()
        };
        assert!(origin_allowed(&policy, &with_origin("https://fleet.example")));
        assert!(!origin_allowed(&policy, &with_origin("https://evil.example")));
        assert!(!origin_allowed(&policy, &with_origin("https://fleet.example.evil")));

        let no_origin = Request::builder().uri("ws://localhost/ws").body(()).unwrap();
        assert!(origin_allowed(&policy, &no_origin));
    }
}
