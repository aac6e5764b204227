use std::time::Duration;
use thiserror::Error;

/// Main error type for swarmsockets
#[derive(Error, Debug)]
pub enum EngineError {
    /// Write/close attempted on a session whose pumps have stopped
    #[error("session is closed")]
    SessionClosed,

    /// Close attempted on a session that was already closed
    #[error("session is already closed")]
    SessionAlreadyClosed,

    /// Broadcast/serve attempted after the hub shut down
    #[error("engine instance is closed")]
    EngineClosed,

    /// Second shutdown of the engine
    #[error("engine instance is already closed")]
    EngineAlreadyClosed,

    /// WebSocket transport error (handshake, read, write)
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope or body could not be encoded/decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// A socket write did not complete within the configured deadline
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// A hub control channel rejected a request
    #[error("hub channel send failed: {0}")]
    ChannelSend(String),
}

/// Result type for swarmsockets operations
pub type Result<T> = std::result::Result<T, EngineError>;
