//! # SwarmSockets Traits
//!
//! Core traits and types for the swarmsockets event engine:
//!
//! - **Codec**: pluggable envelope/body serialization
//! - **Handler types**: event handler chains and lifecycle hooks
//! - **EngineError**: the library error taxonomy

pub mod codec;
pub mod error;
pub mod handler;

// Re-export commonly used types
pub use codec::{Codec, JsonCodec};
pub use error::{EngineError, Result};
pub use handler::{
    chain_from, CloseHook, ErrorHook, EventHandler, FilterFn, HandlerChain, SessionHook,
};
