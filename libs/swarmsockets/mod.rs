//! # SwarmSockets
//!
//! An event-routing WebSocket engine for fleet backends.
//!
//! ## Features
//!
//! - **Event routing**: dot-delimited event names matched against prefix
//!   trees with `:param` captures and `*rest` catch-alls
//! - **Middleware chains**: gin-style handler chains with `next`/`abort`
//!   flow control, global middleware, and nested route groups
//! - **Hub broadcast**: single-owner session registry with filtered
//!   fan-out over a bounded worker pool
//! - **Backpressure by construction**: bounded per-session output queues
//!   with configurable slow-consumer policy; enqueues never block
//! - **Pluggable codecs**: JSON by default, any `Codec` implementation
//!   for the envelope or its body
//!
//! ## Example
//!
//! ```rust,ignore
//! use swarmsockets::{Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> swarmsockets::Result<()> {
//!     let engine = Engine::new(EngineConfig::default());
//!
//!     engine.text("node.:id.status", &[Arc::new(|ctx| {
//!         let id = ctx.param("id").unwrap_or("?").to_string();
//!         tracing::info!(node = %id, "status report");
//!     })]);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:9100").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         let engine = Arc::clone(&engine);
//!         tokio::spawn(async move {
//!             let _ = engine.serve(stream).await;
//!         });
//!     }
//! }
//! ```

pub mod core;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export core engine functionality
pub use self::core::{
    config, engine, group, message, router, session,
    config::{EngineConfig, OriginPolicy, OverflowPolicy},
    context::Context,
    engine::Engine,
    group::RouterGroup,
    message::{format_close_message, Envelope, EventKind, Frame, FrameKind},
    router::{Param, Params},
    session::Session,
};
