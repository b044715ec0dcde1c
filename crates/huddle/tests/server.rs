//! End-to-end tests: a real server on an OS-assigned port, driven by
//! `tokio-tungstenite` clients speaking JSON frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle::prelude::*;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Accepts `token-<user>`.
struct TestAuth;

impl Authenticator for TestAuth {
    async fn verify(&self, token: &str, _expected: TokenKind) -> Option<Claims> {
        token.strip_prefix("token-").map(Claims::new)
    }
}

async fn start(builder: HuddleServerBuilder) -> (SocketAddr, ShutdownHandle, tokio::task::JoinHandle<()>) {
    let cache = Arc::new(SecureCache::in_memory(&EncryptionKey::generate()).unwrap());
    let server = builder
        .bind("127.0.0.1:0")
        .build(TestAuth, cache)
        .await
        .expect("server should bind");
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(async move {
        server.run().await.expect("server should run");
    });
    (addr, shutdown, handle)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("client should connect");
    client
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send should succeed");
}

/// Next text frame as JSON, failing the test after two seconds.
async fn recv(client: &mut Client) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error");
    let text = msg.into_text().expect("text frame");
    serde_json::from_str(text.as_str()).expect("valid JSON")
}

#[tokio::test]
async fn test_server_heartbeat_round_trip() {
    let (addr, shutdown, handle) = start(HuddleServerBuilder::new()).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"event": "heartbeat", "data": {}})).await;
    let ack = recv(&mut client).await;
    assert_eq!(ack["event"], "heartbeat_ack");
    assert!(ack["data"]["server_time"].as_u64().unwrap() > 0);

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_server_create_and_join_room() {
    let (addr, shutdown, handle) = start(HuddleServerBuilder::new()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, json!({"event": "authenticate", "data": {"token": "token-alice"}})).await;
    let auth = recv(&mut alice).await;
    assert_eq!(auth["event"], "authenticated");
    assert_eq!(auth["data"]["user_id"], "alice");

    send(
        &mut alice,
        json!({"event": "create_room", "data": {"room_id": "arena", "max_players": 4}}),
    )
    .await;
    let created = recv(&mut alice).await;
    assert_eq!(created["event"], "create_room_success");
    assert_eq!(created["data"]["owner_id"], "alice");
    assert_eq!(created["data"]["max_size"], 4);
    let joined = recv(&mut alice).await;
    assert_eq!(joined["event"], "room_joined");
    assert_eq!(joined["data"]["current_size"], 1);

    send(&mut bob, json!({"event": "join_room", "data": {"room_id": "arena"}})).await;
    let success = recv(&mut bob).await;
    assert_eq!(success["event"], "join_room_success");
    assert_eq!(success["data"]["current_size"], 2);

    let notice = recv(&mut alice).await;
    assert_eq!(notice["event"], "member_joined");
    assert_eq!(notice["data"]["room_id"], "arena");

    send(&mut bob, json!({"event": "get_public_rooms", "data": {}})).await;
    let listing = recv(&mut bob).await;
    assert_eq!(listing["event"], "get_public_rooms_success");
    assert_eq!(listing["data"]["count"], 1);

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_server_invalid_frame_gets_error_and_connection_survives() {
    let (addr, shutdown, handle) = start(HuddleServerBuilder::new()).await;
    let mut client = connect(addr).await;

    client.send(Message::Text("not json".into())).await.unwrap();
    let error = recv(&mut client).await;
    assert_eq!(error, json!({"event": "error", "data": {"error": "invalid_event"}}));

    send(&mut client, json!({"event": "heartbeat", "data": {}})).await;
    assert_eq!(recv(&mut client).await["event"], "heartbeat_ack");

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_server_client_close_notifies_room() {
    let (addr, shutdown, handle) = start(HuddleServerBuilder::new()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send(&mut alice, json!({"event": "create_room", "data": {"room_id": "r1"}})).await;
    recv(&mut alice).await;
    recv(&mut alice).await;
    send(&mut bob, json!({"event": "join_room", "data": {"room_id": "r1"}})).await;
    recv(&mut bob).await;
    assert_eq!(recv(&mut alice).await["event"], "member_joined");

    bob.close(None).await.unwrap();
    let left = recv(&mut alice).await;
    assert_eq!(left["event"], "member_left");
    assert_eq!(left["data"]["room_id"], "r1");

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_server_idle_connection_is_closed() {
    let builder = HuddleServerBuilder::new().idle_timeout(Duration::from_millis(100));
    let (addr, shutdown, handle) = start(builder).await;
    let mut client = connect(addr).await;

    let next = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("server should close the idle connection");
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "expected close, got {next:?}"
    );

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_server_stalled_handshake_does_not_block_other_clients() {
    let (addr, shutdown, handle) = start(HuddleServerBuilder::new()).await;
    let _stalled = tokio::net::TcpStream::connect(addr).await.unwrap();

    let mut client = tokio::time::timeout(Duration::from_secs(2), connect(addr))
        .await
        .expect("second client must get through");
    send(&mut client, json!({"event": "heartbeat", "data": {}})).await;
    assert_eq!(recv(&mut client).await["event"], "heartbeat_ack");

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_server_rate_limit_over_the_wire() {
    let builder = HuddleServerBuilder::new()
        .rate_limits(RateLimitConfig::unlimited().with_rule("create_room", RateRule::per_minute(1)));
    let (addr, shutdown, handle) = start(builder).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"event": "create_room", "data": {}})).await;
    assert_eq!(recv(&mut client).await["event"], "create_room_success");
    recv(&mut client).await;

    send(&mut client, json!({"event": "create_room", "data": {}})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"event": "create_room_error", "data": {"error": "rate_limited"}})
    );

    shutdown.shutdown();
    handle.await.unwrap();
}
