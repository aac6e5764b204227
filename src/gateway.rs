//! Gateway assembly: configuration, event routes and lifecycle hooks
//!
//! Crawler nodes announce themselves with `node.register`, then report
//! through `node.<id>.status`; dashboards follow `log.<path>` streams.
//! Everything a node sends is fanned out to the other sessions, so any
//! connected dashboard sees the whole fleet.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use swarmsockets::{
    Context, Engine, EngineConfig, EngineError, Envelope, EventHandler, OriginPolicy, Session,
};
use tracing::{info, warn};

/// Gateway configuration, read from the environment
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address, `FLEET_WS_BIND` (default `0.0.0.0:9100`)
    pub bind_addr: String,
    /// Comma-separated origin allow-list, `FLEET_WS_ORIGINS` (default: any)
    pub allowed_origins: Option<Vec<String>>,
    /// Liveness window in seconds, `FLEET_WS_PONG_WAIT` (default 60)
    pub pong_wait: Duration,
    /// Maximum inbound message size in bytes, `FLEET_WS_MAX_MESSAGE` (default 512)
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            allowed_origins: None,
            pong_wait: Duration::from_secs(60),
            max_message_size: 512,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("FLEET_WS_BIND").unwrap_or(defaults.bind_addr),
            allowed_origins: std::env::var("FLEET_WS_ORIGINS").ok().map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            pong_wait: std::env::var("FLEET_WS_PONG_WAIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.pong_wait),
            max_message_size: std::env::var("FLEET_WS_MAX_MESSAGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_message_size),
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_pong_wait(self.pong_wait)
            .with_ping_period(self.pong_wait * 9 / 10)
            .with_max_message_size(self.max_message_size);
        if let Some(origins) = &self.allowed_origins {
            config = config.with_origin_policy(OriginPolicy::AllowList(origins.clone()));
        }
        config
    }
}

/// Build the gateway engine: routes, middleware and hooks
pub fn build_engine(config: &GatewayConfig) -> Arc<Engine> {
    let engine = Engine::new(config.engine_config());

    engine.on_connect(Arc::new(|session: &Arc<Session>| {
        info!(session = session.id(), "node connected");
    }));
    engine.on_disconnect(Arc::new(|session: &Arc<Session>| {
        info!(session = session.id(), "node disconnected");
    }));
    engine.on_close(Arc::new(|session: &Arc<Session>, code: u16, reason: &str| {
        info!(session = session.id(), code, reason, "peer closed");
        Ok(())
    }));
    engine.on_error(Arc::new(|ctx: &mut Context, err: &EngineError| {
        warn!(error = %err, "unreadable frame");
        let _ = reply(ctx, "error", json!({"reason": "malformed message"}));
    }));

    // Log every routed event before its handlers run.
    engine.use_middleware(Arc::new(|ctx: &mut Context| {
        if let Some(envelope) = ctx.message() {
            info!(event = envelope.event(), "event received");
        }
    }));

    engine.text("echo", &[echo_handler()]);
    engine.text("node.register", &[register_handler()]);

    {
        let node = engine.group("node");
        node.text(":id.status", &[status_handler()]);
    }
    engine.text("log.*path", &[log_tail_handler()]);

    engine.no_route(&[Arc::new(|ctx: &mut Context| {
        let event = ctx
            .message()
            .map(|m| m.event().to_string())
            .unwrap_or_default();
        warn!(event, "unroutable event");
        let _ = reply(ctx, "error", json!({"reason": "unknown event", "event": event}));
    })]);

    engine
}

fn reply(ctx: &Context, event: &str, body: Value) -> swarmsockets::Result<()> {
    ctx.write(&Envelope::new(event, body))
}

/// Echo the envelope back to the sender unchanged
fn echo_handler() -> EventHandler {
    Arc::new(|ctx: &mut Context| {
        if let Some(envelope) = ctx.message() {
            let envelope = envelope.clone();
            if let Err(e) = ctx.write(&envelope) {
                warn!(error = %e, "echo reply failed");
            }
        }
    })
}

/// `node.register`: bind a node id to the session and announce the node
/// to everyone else
fn register_handler() -> EventHandler {
    Arc::new(|ctx: &mut Context| {
        let name = ctx
            .message()
            .and_then(|m| m.body.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let name = match name {
            Some(name) => name,
            None => {
                let _ = reply(ctx, "error", json!({"reason": "missing node name"}));
                ctx.abort();
                return;
            }
        };

        let session = match ctx.session() {
            Some(session) => Arc::clone(session),
            None => return,
        };
        session.set("node_id", json!(name));
        let _ = reply(ctx, "node.registered", json!({"name": name, "session": session.id()}));

        if let Some(engine) = ctx.engine() {
            announce(engine, &session, "node.joined", json!({"name": name}));
        }
    })
}

/// `node.:id.status`: fan a node's status report out to the rest of the
/// fleet
fn status_handler() -> EventHandler {
    Arc::new(|ctx: &mut Context| {
        let id = ctx.param("id").unwrap_or("unknown").to_string();
        let body = ctx.message().map(|m| m.body.clone()).unwrap_or(Value::Null);

        let session = match ctx.session() {
            Some(session) => Arc::clone(session),
            None => return,
        };
        if let Some(engine) = ctx.engine() {
            announce(
                engine,
                &session,
                "node.status",
                json!({"node": id, "report": body}),
            );
        }
    })
}

/// `log.*path`: acknowledge a log tail subscription with the captured
/// path
fn log_tail_handler() -> EventHandler {
    Arc::new(|ctx: &mut Context| {
        let path = ctx.param("path").unwrap_or_default().to_string();
        if let Some(session) = ctx.session() {
            session.set("log_path", json!(path));
        }
        let _ = reply(ctx, "log.subscribed", json!({"path": path}));
    })
}

/// Broadcast an envelope to every session except the originator.
/// Handlers are synchronous, so the hub send runs on a spawned task.
fn announce(engine: &Arc<Engine>, from: &Arc<Session>, event: &str, body: Value) {
    let payload = match serde_json::to_vec(&Envelope::new(event, body)) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "broadcast encode failed");
            return;
        }
    };
    let engine = Arc::clone(engine);
    let from = Arc::clone(from);
    tokio::spawn(async move {
        if let Err(e) = engine.broadcast_others(payload, &from).await {
            warn!(error = %e, "broadcast failed");
        }
    });
}
