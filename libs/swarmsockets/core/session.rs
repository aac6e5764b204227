//! Session: one logical client connection and its read/write pumps
//!
//! Each connection owns two concurrently-running loops: the read pump
//! (driven inline by [`crate::core::engine::Engine::serve`]) and the write
//! pump (a background task). All outbound traffic funnels through the
//! session's bounded output channel; enqueues never block, so no producer
//! can deadlock the write pump.
//!
//! Per-session state machine: Connecting → Open → Closing → Closed. A
//! session is Open once registered with the hub, Closing after any pump
//! error / explicit close / hub shutdown, and Closed once the socket is
//! released and the output channel dropped. No transition is reversible.

use crate::core::config::OverflowPolicy;
use crate::core::engine::Engine;
use crate::core::message::{
    is_valid_received_close_code, EventKind, Frame, FrameKind, CLOSE_NO_STATUS_RECEIVED,
};
use crate::traits::error::{EngineError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Wrapper around one live WebSocket connection
pub struct Session {
    id: u64,
    keys: RwLock<HashMap<String, Value>>,
    output: mpsc::Sender<Frame>,
    open: RwLock<bool>,
    // One closer per pump so `notify_one` permit semantics apply: a
    // notification sent before the pump's first poll is stored, not lost.
    read_closer: Notify,
    write_closer: Notify,
    overflow_policy: OverflowPolicy,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        keys: HashMap<String, Value>,
        buffer: usize,
        overflow_policy: OverflowPolicy,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (output, output_rx) = mpsc::channel(buffer);
        let session = Arc::new(Self {
            id,
            keys: RwLock::new(keys),
            output,
            open: RwLock::new(true),
            read_closer: Notify::new(),
            write_closer: Notify::new(),
            overflow_policy,
        });
        (session, output_rx)
    }

    /// Unique id of this session within its engine
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Store a key/value pair in this session's context bag
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.keys.write().insert(key.into(), value);
    }

    /// Fetch a value from the context bag
    pub fn get(&self, key: &str) -> Option<Value> {
        self.keys.read().get(key).cloned()
    }

    pub(crate) fn keys_snapshot(&self) -> HashMap<String, Value> {
        self.keys.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        !*self.open.read()
    }

    /// Enqueue a text frame. Returns an error only when the session is
    /// closed; a full buffer is handled by the overflow policy and never
    /// reported to the producer.
    pub fn write(&self, payload: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::SessionClosed);
        }
        self.write_frame(Frame::text(payload))
    }

    /// Enqueue a binary frame
    pub fn write_binary(&self, payload: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::SessionClosed);
        }
        self.write_frame(Frame::binary(payload))
    }

    /// Enqueue a close frame. Teardown happens when the write pump
    /// observes the frame, not synchronously here.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::SessionAlreadyClosed);
        }
        self.write_frame(Frame::close(Vec::new()))
    }

    /// Enqueue a close frame with a payload (see
    /// [`crate::core::message::format_close_message`])
    pub fn close_with_payload(&self, payload: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::SessionAlreadyClosed);
        }
        self.write_frame(Frame::close(payload))
    }

    /// Non-blocking enqueue onto the output buffer. Fire-and-forget for
    /// broadcast fan-out; the overflow policy decides what a full buffer
    /// means.
    pub(crate) fn write_frame(&self, frame: Frame) -> Result<()> {
        match self.output.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(
                    session = self.id,
                    kind = ?frame.kind,
                    "session output buffer full, dropping frame"
                );
                if self.overflow_policy == OverflowPolicy::Disconnect {
                    warn!(session = self.id, "disconnecting slow consumer");
                    self.force_close();
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(EngineError::SessionClosed),
        }
    }

    /// Flip to closed without waking the pumps; the write pump keeps
    /// draining already-queued frames (used on hub shutdown so the queued
    /// close frame still goes out).
    pub(crate) fn mark_closed(&self) {
        *self.open.write() = false;
    }

    /// Hard close: flip to closed and wake both pumps. Each pump has its
    /// own single-consumer `Notify`, so the wakeup is stored as a permit
    /// when a pump has not reached its select yet.
    pub(crate) fn force_close(&self) {
        self.mark_closed();
        self.read_closer.notify_one();
        self.write_closer.notify_one();
    }

    /// Write pump: single consumer of the output channel. Exits when the
    /// channel closes, a close frame is written, a write fails, or the
    /// session is force-closed.
    pub(crate) async fn write_pump<S>(
        self: Arc<Self>,
        mut sink: SplitSink<WebSocketStream<S>, Message>,
        mut output: mpsc::Receiver<Frame>,
        write_wait: Duration,
        ping_period: Duration,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut ticker = tokio::time::interval(ping_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the interval's immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.write_closer.notified() => break,
                maybe = output.recv() => match maybe {
                    None => break,
                    Some(frame) => {
                        let is_close = frame.kind == FrameKind::Close;
                        if let Err(e) = write_raw(&mut sink, to_ws_message(frame), write_wait).await {
                            debug!(session = self.id, error = %e, "write pump error");
                            break;
                        }
                        if is_close {
                            break;
                        }
                    }
                },
                _ = ticker.tick() => {
                    if self.is_closed() {
                        break;
                    }
                    if let Err(e) = write_raw(&mut sink, to_ws_message(Frame::ping()), write_wait).await {
                        debug!(session = self.id, error = %e, "ping write failed");
                        break;
                    }
                }
            }
        }

        let _ = sink.close().await;
        self.force_close();
        debug!(session = self.id, "write pump exited");
    }

    /// Read pump: blocks on one frame at a time for the life of the
    /// connection. Any read error or deadline expiry exits the loop and
    /// triggers the disconnect sequence in `Engine::serve`.
    pub(crate) async fn read_pump<S>(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
        mut read: SplitStream<WebSocketStream<S>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let pong_wait = engine.config().pong_wait;

        loop {
            if self.is_closed() {
                break;
            }

            let msg = tokio::select! {
                _ = self.read_closer.notified() => break,
                res = tokio::time::timeout(pong_wait, read.next()) => match res {
                    // No traffic (pongs included) within the liveness window.
                    Err(_) => {
                        debug!(session = self.id, "read deadline expired");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        debug!(session = self.id, error = %e, "read error");
                        break;
                    }
                    Ok(Some(Ok(msg))) => msg,
                },
            };

            match msg {
                Message::Pong(_) => {
                    if let Some(hook) = engine.pong_hook() {
                        hook(self);
                    }
                }
                // The protocol layer queues the pong reply itself; a ping
                // only counts as liveness here.
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (CLOSE_NO_STATUS_RECEIVED, String::new()),
                    };
                    if !is_valid_received_close_code(code) {
                        warn!(session = self.id, code, "abnormal close code received");
                    }
                    if let Some(hook) = engine.close_hook() {
                        if let Err(e) = hook(self, code, &reason) {
                            warn!(session = self.id, error = %e, "close hook failed");
                        }
                    }
                    break;
                }
                Message::Text(text) => {
                    engine.dispatch(self, EventKind::Text, text.into_bytes());
                }
                Message::Binary(data) => {
                    engine.dispatch(self, EventKind::Binary, data);
                }
                Message::Frame(_) => {}
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_raw<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    msg: Message,
    write_wait: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(write_wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(EngineError::WebSocket(e)),
        Err(_) => Err(EngineError::WriteTimeout(write_wait)),
    }
}

fn to_ws_message(frame: Frame) -> Message {
    match frame.kind {
        FrameKind::Text => Message::Text(String::from_utf8_lossy(&frame.payload).into_owned()),
        FrameKind::Binary => Message::Binary(frame.payload),
        FrameKind::Ping => Message::Ping(frame.payload),
        FrameKind::Close => {
            if frame.payload.len() < 2 {
                Message::Close(None)
            } else {
                let code = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                let reason = String::from_utf8_lossy(&frame.payload[2..]).into_owned();
                Message::Close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: Cow::Owned(reason),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(buffer: usize, policy: OverflowPolicy) -> (Arc<Session>, mpsc::Receiver<Frame>) {
        Session::new(1, HashMap::new(), buffer, policy)
    }

    #[test]
    fn writes_rejected_after_close() {
        let (session, _rx) = session(4, OverflowPolicy::DropFrame);
        session.force_close();
        assert!(matches!(
            session.write(b"late".to_vec()),
            Err(EngineError::SessionClosed)
        ));
        assert!(matches!(
            session.close(),
            Err(EngineError::SessionAlreadyClosed)
        ));
    }

    #[test]
    fn full_buffer_drops_without_error() {
        let (session, mut rx) = session(1, OverflowPolicy::DropFrame);
        assert!(session.write(b"one".to_vec()).is_ok());
        // Buffer is full; the next writes are dropped, not errors.
        assert!(session.write(b"two".to_vec()).is_ok());
        assert!(session.write(b"three".to_vec()).is_ok());
        assert!(!session.is_closed());

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.payload, b"one");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_policy_tears_down_slow_consumer() {
        let (session, _rx) = session(1, OverflowPolicy::Disconnect);
        assert!(session.write(b"one".to_vec()).is_ok());
        assert!(session.write(b"overflow".to_vec()).is_ok());
        assert!(session.is_closed());
    }

    #[test]
    fn context_bag_round_trip() {
        let (session, _rx) = session(1, OverflowPolicy::DropFrame);
        session.set("node_id", serde_json::json!("crawler-3"));
        assert_eq!(session.get("node_id"), Some(serde_json::json!("crawler-3")));
        assert_eq!(session.get("missing"), None);
    }

    #[test]
    fn liveness_ping_maps_to_a_ping_message() {
        match to_ws_message(Frame::ping()) {
            Message::Ping(payload) => assert!(payload.is_empty()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn force_close_before_first_poll_stops_the_write_pump() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        let (session, rx) = session(4, OverflowPolicy::DropFrame);
        let (server_io, _client_io) = tokio::io::duplex(1024);
        let ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let (sink, _read) = ws.split();

        // Close before the pump task ever polls its closer.
        session.force_close();
        let pump = tokio::spawn(Session::write_pump(
            Arc::clone(&session),
            sink,
            rx,
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));

        tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("write pump did not observe the close")
            .expect("write pump panicked");
    }

    #[test]
    fn close_frame_payload_is_parsed() {
        let payload = crate::core::message::format_close_message(1001, "bye");
        match to_ws_message(Frame::close(payload)) {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
