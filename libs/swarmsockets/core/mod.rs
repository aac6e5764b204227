//! # SwarmSockets Core
//!
//! The engine internals: wire envelope and frames, the event router, the
//! per-dispatch context and its pool, sessions with their read/write
//! pumps, the hub, the broadcast worker pool, and configuration.
//!
//! Most applications only need the re-exports from the crate root.

pub mod config;
pub mod context;
pub mod engine;
pub mod group;
pub(crate) mod hub;
pub mod message;
pub mod router;
pub mod session;
pub(crate) mod worker;

// Re-export main types
pub use config::{EngineConfig, OriginPolicy, OverflowPolicy};
pub use context::Context;
pub use engine::Engine;
pub use group::RouterGroup;
pub use message::{
    format_close_message, is_valid_received_close_code, Envelope, EventKind, Frame, FrameKind,
};
pub use router::{Param, Params, Router, Tree};
pub use session::Session;
