//! End-to-end integration tests: WebSocket connection, channel join,
//! chat relay and session restore through the running server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_server::{RelayServer, Roster, ServerConfig};
use relay_transport::{TransportConfig, TransportServer};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a relay with the full command set on a random port.
async fn start_test_server() -> u16 {
    let config = ServerConfig {
        session_secret: Some(b"integration-secret".to_vec()),
        trip_salt: "integration-salt".into(),
        ..ServerConfig::default()
    };
    let server = Arc::new(RelayServer::new(config, Arc::new(Roster::default()), relay_commands::all));
    server.reload().unwrap();

    let transport_config = TransportConfig {
        port: 0, // OS-assigned
        hostname: "127.0.0.1".into(),
        max_connections: Some(16),
        heartbeat_interval_ms: 0,
        trust_proxy: false,
        verbose_logging: false,
    };

    let transport = TransportServer::start(transport_config, server).await.unwrap();
    let port = transport.port();

    // Leak the transport to keep it running for the test
    Box::leak(Box::new(transport));

    port
}

async fn connect(port: u16) -> Socket {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (ws, _) = connect_async(&url).await.expect("Failed to connect");
    ws
}

async fn send(ws: &mut Socket, payload: Value) {
    ws.send(Message::Text(payload.to_string().into())).await.unwrap();
}

/// Next JSON text frame, skipping pings and pongs.
async fn next_json(ws: &mut Socket) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until one carries `cmd`.
async fn recv_cmd(ws: &mut Socket, cmd: &str) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["cmd"] == cmd {
            return frame;
        }
    }
}

/// Join `channel` as `nick` and return the issued session token.
async fn join(ws: &mut Socket, nick: &str, channel: &str) -> String {
    send(ws, json!({"cmd": "join", "nick": nick, "channel": channel})).await;
    let session = recv_cmd(ws, "session").await;
    assert_eq!(session["restored"], false);
    session["token"].as_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let port = start_test_server().await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("Timeout reading health response")
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));
}

// ─────────────────────────────────────────────────────────────────────────────
// Join and chat
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_join_lists_channel() {
    let port = start_test_server().await;
    let mut ws = connect(port).await;

    send(&mut ws, json!({"cmd": "join", "nick": "alice", "channel": "lobby"})).await;
    let online = recv_cmd(&mut ws, "onlineSet").await;
    assert_eq!(online["nicks"], json!(["alice"]));
    assert_eq!(online["channel"], "lobby");
    assert!(online["time"].is_i64());

    let session = recv_cmd(&mut ws, "session").await;
    assert_eq!(session["channels"], json!(["lobby"]));
    assert!(session["token"].as_str().unwrap().starts_with("v1."));
}

#[tokio::test]
async fn test_chat_reaches_channel_peers() {
    let port = start_test_server().await;
    let mut alice = connect(port).await;
    let mut bob = connect(port).await;

    join(&mut alice, "alice", "lobby").await;
    join(&mut bob, "bob", "lobby").await;

    let added = recv_cmd(&mut alice, "onlineAdd").await;
    assert_eq!(added["nick"], "bob");

    send(&mut bob, json!({"cmd": "chat", "text": "  hello there  "})).await;

    for ws in [&mut alice, &mut bob] {
        let chat = recv_cmd(ws, "chat").await;
        assert_eq!(chat["nick"], "bob");
        assert_eq!(chat["text"], "hello there");
        assert_eq!(chat["channel"], "lobby");
    }
}

#[tokio::test]
async fn test_commands_before_join_are_dropped() {
    let port = start_test_server().await;
    let mut ws = connect(port).await;

    send(&mut ws, json!({"cmd": "chat", "text": "too early"})).await;
    send(&mut ws, json!({"cmd": "help"})).await;
    send(&mut ws, json!({"cmd": "join", "nick": "carol", "channel": "lobby"})).await;

    // Frames are handled in order, so nothing may arrive before the join reply
    let first = next_json(&mut ws).await;
    assert_eq!(first["cmd"], "onlineSet");
}

#[tokio::test]
async fn test_unknown_command_suggests() {
    let port = start_test_server().await;
    let mut ws = connect(port).await;
    join(&mut ws, "dave", "lobby").await;

    send(&mut ws, json!({"cmd": "chta", "text": "hi"})).await;
    let warn = recv_cmd(&mut ws, "warn").await;
    assert!(warn["text"].as_str().unwrap().contains("`chat`"));
}

#[tokio::test]
async fn test_malformed_frame_closes_socket() {
    let port = start_test_server().await;
    let mut ws = connect(port).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();

    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("Timeout waiting for close");
    assert!(closed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnect_restores_session() {
    let port = start_test_server().await;

    let mut first = connect(port).await;
    let token = join(&mut first, "erin", "lobby").await;
    first.close(None).await.unwrap();

    let mut second = connect(port).await;
    send(&mut second, json!({"cmd": "session", "token": token})).await;

    let session = recv_cmd(&mut second, "session").await;
    assert_eq!(session["restored"], true);
    assert_eq!(session["channels"], json!(["lobby"]));

    // The restored identity can chat without joining again
    send(&mut second, json!({"cmd": "chat", "text": "back again"})).await;
    let chat = recv_cmd(&mut second, "chat").await;
    assert_eq!(chat["nick"], "erin");
}

#[tokio::test]
async fn test_bad_token_fails_uniformly() {
    let port = start_test_server().await;
    let mut ws = connect(port).await;

    send(&mut ws, json!({"cmd": "session", "token": "v1.garbage.garbage"})).await;
    let session = recv_cmd(&mut ws, "session").await;
    assert_eq!(session["restored"], false);
    assert_eq!(session["channels"], json!([]));
    assert!(session.get("token").is_none());
}

#[tokio::test]
async fn test_departure_notifies_peers() {
    let port = start_test_server().await;
    let mut alice = connect(port).await;
    let mut bob = connect(port).await;

    join(&mut alice, "alice", "lobby").await;
    join(&mut bob, "bob", "lobby").await;
    recv_cmd(&mut alice, "onlineAdd").await;

    bob.close(None).await.unwrap();

    let removed = recv_cmd(&mut alice, "onlineRemove").await;
    assert_eq!(removed["nick"], "bob");
    assert_eq!(removed["channel"], "lobby");
}
