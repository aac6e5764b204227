//! Fleet WebSocket Gateway - Main Library
//!
//! The gateway wires the swarmsockets event engine into the crawler-fleet
//! backend: event routes for node registration, status reporting and log
//! tailing, lifecycle hooks, and the TCP accept loop.
//!
//! ## Architecture
//!
//! - **gateway**: engine assembly (routes, hooks, configuration from env)
//! - **swarmsockets**: the event-routing WebSocket engine (re-exported
//!   from the workspace)

// Re-export the workspace library for convenience
pub use swarmsockets;

pub mod gateway;

pub use gateway::{build_engine, GatewayConfig};
