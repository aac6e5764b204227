//! Common test utilities for swarmsockets integration tests
//!
//! Connections run over in-memory duplex pipes: `Engine::serve` takes one
//! end, a tokio-tungstenite client the other, so the full protocol stack
//! is exercised without sockets.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use swarmsockets::Engine;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

pub type WsClient = WebSocketStream<DuplexStream>;

/// Open one client connection against the engine over an in-memory pipe.
/// The returned handle resolves when the server side finishes teardown.
pub async fn connect(engine: &Arc<Engine>) -> (WsClient, JoinHandle<swarmsockets::Result<()>>) {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let engine = Arc::clone(engine);
    let server = tokio::spawn(async move { engine.serve(server_io).await });
    let (ws, _response) = tokio_tungstenite::client_async("ws://fleet.test/ws", client_io)
        .await
        .expect("client handshake failed");
    (ws, server)
}

/// Send a `{event, body}` envelope as a text frame
pub async fn send_event(ws: &mut WsClient, event: &str, body: Value) {
    let payload = serde_json::json!({"event": event, "body": body}).to_string();
    ws.send(Message::Text(payload)).await.expect("send failed");
}

/// Receive the next text frame and parse it as JSON, skipping control
/// frames
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended unexpectedly")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Receive the next close frame, skipping everything else
pub async fn recv_close(ws: &mut WsClient) -> Option<(u16, String)> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("connection ended unexpectedly")
            .expect("websocket error");
        if let Message::Close(frame) = msg {
            return frame.map(|f| (u16::from(f.code), f.reason.into_owned()));
        }
    }
}

/// Block until the hub has registered exactly `n` sessions
pub async fn wait_for_sessions(engine: &Arc<Engine>, n: usize) {
    for _ in 0..200 {
        if engine.len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("engine never reached {n} sessions (at {})", engine.len());
}
