//! Integration tests for the gateway's fleet routes
//!
//! Drives real WebSocket clients against the assembled engine over
//! in-memory pipes.

use fleet_ws_gateway::{build_engine, GatewayConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use swarmsockets::Engine;
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsClient = WebSocketStream<DuplexStream>;

async fn connect(engine: &Arc<Engine>) -> WsClient {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        let _ = engine.serve(server_io).await;
    });
    let (ws, _response) = tokio_tungstenite::client_async("ws://fleet.test/ws", client_io)
        .await
        .expect("client handshake failed");
    ws
}

async fn send_event(ws: &mut WsClient, event: &str, body: Value) {
    let payload = json!({"event": event, "body": body}).to_string();
    ws.send(Message::Text(payload)).await.expect("send failed");
}

async fn recv_json(ws: &mut WsClient) -> Value {
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

async fn wait_for_sessions(engine: &Arc<Engine>, n: usize) {
    for _ in 0..200 {
        if engine.len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("engine never reached {n} sessions");
}

#[tokio::test]
async fn register_acks_and_announces_to_the_fleet() {
    let engine = build_engine(&GatewayConfig::default());
    let mut node = connect(&engine).await;
    let mut dashboard = connect(&engine).await;
    wait_for_sessions(&engine, 2).await;

    send_event(&mut node, "node.register", json!({"name": "crawler-1"})).await;

    let ack = recv_json(&mut node).await;
    assert_eq!(ack["event"], "node.registered");
    assert_eq!(ack["body"]["name"], "crawler-1");

    let announcement = recv_json(&mut dashboard).await;
    assert_eq!(announcement["event"], "node.joined");
    assert_eq!(announcement["body"]["name"], "crawler-1");
}

#[tokio::test]
async fn register_without_a_name_is_rejected() {
    let engine = build_engine(&GatewayConfig::default());
    let mut node = connect(&engine).await;

    send_event(&mut node, "node.register", json!({})).await;

    let reply = recv_json(&mut node).await;
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["body"]["reason"], "missing node name");
}

#[tokio::test]
async fn status_reports_fan_out_to_other_sessions() {
    let engine = build_engine(&GatewayConfig::default());
    let mut node = connect(&engine).await;
    let mut dashboard = connect(&engine).await;
    wait_for_sessions(&engine, 2).await;

    send_event(&mut node, "node.crawler-2.status", json!({"cpu": 0.7})).await;

    let report = recv_json(&mut dashboard).await;
    assert_eq!(report["event"], "node.status");
    assert_eq!(report["body"]["node"], "crawler-2");
    assert_eq!(report["body"]["report"]["cpu"], 0.7);
}

#[tokio::test]
async fn log_subscription_captures_the_full_path() {
    let engine = build_engine(&GatewayConfig::default());
    let mut dashboard = connect(&engine).await;

    send_event(&mut dashboard, "log.spiders.crawler-2.errors", json!(null)).await;

    let ack = recv_json(&mut dashboard).await;
    assert_eq!(ack["event"], "log.subscribed");
    assert_eq!(ack["body"]["path"], "spiders.crawler-2.errors");
}

#[tokio::test]
async fn unknown_events_get_an_error_reply() {
    let engine = build_engine(&GatewayConfig::default());
    let mut ws = connect(&engine).await;

    send_event(&mut ws, "fleet.selfdestruct", json!(null)).await;

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["body"]["reason"], "unknown event");
    assert_eq!(reply["body"]["event"], "fleet.selfdestruct");
}
