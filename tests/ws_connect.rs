//! End-to-end WebSocket tests against a real server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use maproom::routes;
use maproom::services::persistence::spawn_persistence_worker;
use maproom::state::{AppState, SessionState};
use maproom::store::MapStore;
use maproom::store::mem::MemStore;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let store: Arc<dyn MapStore> = Arc::new(MemStore::new());
    let session = SessionState::load(store.as_ref()).await.unwrap();
    let persist_tx = spawn_persistence_worker(store.clone());
    let state = AppState::new(Arc::new(RwLock::new(session)), store, persist_tx, None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes::app(state)).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut WsClient, msg: Value) {
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
}

async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read messages until one of the given type arrives, collecting every type
/// tag seen along the way (the matching one included).
async fn recv_until(ws: &mut WsClient, wanted: &str) -> (Value, Vec<String>) {
    let mut seen = Vec::new();
    loop {
        let msg = recv_json(ws).await;
        let kind = msg["type"].as_str().unwrap().to_string();
        seen.push(kind.clone());
        if kind == wanted {
            return (msg, seen);
        }
    }
}

#[tokio::test]
async fn identify_yields_the_full_scene_snapshot() {
    let addr = spawn_server().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"type": "identify", "persistentId": "alice"})).await;
    let (active, seen) = recv_until(&mut ws, "battlemap.active").await;

    for expected in ["user.connected", "users.all", "covers.all", "users.disconnected", "battlemap.list"] {
        assert!(seen.contains(&expected.to_string()), "missing {expected} in {seen:?}");
    }
    // The empty store was seeded with one battlemap, and it is active.
    assert!(active["battlemapId"].is_string());
}

#[tokio::test]
async fn silent_connection_is_identified_after_the_grace_window() {
    // SAFETY: every connection in this binary either identifies immediately
    // or expects the short window this sets.
    unsafe { std::env::set_var("IDENTIFY_GRACE_SECS", "1") };
    let addr = spawn_server().await;
    let mut ws = connect(addr).await;

    // No identify is ever sent; the grace timer mints an anonymous token
    // and the scene snapshot arrives on its own.
    let (active, seen) = recv_until(&mut ws, "battlemap.active").await;
    for expected in ["user.connected", "users.all", "covers.all", "battlemap.list"] {
        assert!(seen.contains(&expected.to_string()), "missing {expected} in {seen:?}");
    }
    assert!(active["battlemapId"].is_string());

    // The anonymous fallback still leaves the connection without the
    // mutator capability.
    send(&mut ws, json!({"type": "battlemap.create", "name": "Dungeon"})).await;
    let (ack, _) = recv_until(&mut ws, "ack").await;
    assert_eq!(ack["error"]["kind"], "forbidden");
}

#[tokio::test]
async fn plain_connection_cannot_mutate() {
    let addr = spawn_server().await;
    let mut ws = connect(addr).await;

    send(&mut ws, json!({"type": "identify", "persistentId": "alice"})).await;
    recv_until(&mut ws, "battlemap.active").await;

    send(&mut ws, json!({"type": "battlemap.create", "name": "Dungeon"})).await;
    let (ack, _) = recv_until(&mut ws, "ack").await;
    assert_eq!(ack["ok"], false);
    assert_eq!(ack["error"]["kind"], "forbidden");
}

#[tokio::test]
async fn display_creates_and_everyone_hears_about_it() {
    let addr = spawn_server().await;

    let mut player = connect(addr).await;
    send(&mut player, json!({"type": "identify", "persistentId": "alice"})).await;
    recv_until(&mut player, "battlemap.active").await;

    let mut display = connect(addr).await;
    send(&mut display, json!({"type": "identify", "isDisplay": true})).await;
    recv_until(&mut display, "battlemap.active").await;

    let request_id = uuid::Uuid::new_v4();
    send(
        &mut display,
        json!({"type": "battlemap.create", "requestId": request_id, "name": "Dungeon"}),
    )
    .await;

    let (ack, _) = recv_until(&mut display, "ack").await;
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["requestId"], request_id.to_string());
    assert!(ack["id"].is_string());

    // Both sockets receive the refreshed list, mutator included.
    let (list, _) = recv_until(&mut display, "battlemap.list").await;
    let names: Vec<&str> =
        list["battlemaps"].as_array().unwrap().iter().map(|b| b["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"Dungeon"));

    let (list, _) = recv_until(&mut player, "battlemap.list").await;
    assert_eq!(list["battlemaps"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn disconnect_and_reconnect_restore_the_token() {
    let addr = spawn_server().await;

    let mut watcher = connect(addr).await;
    send(&mut watcher, json!({"type": "identify", "persistentId": "watcher"})).await;
    recv_until(&mut watcher, "battlemap.active").await;

    let mut alice = connect(addr).await;
    send(&mut alice, json!({"type": "identify", "persistentId": "alice"})).await;
    recv_until(&mut alice, "battlemap.active").await;
    recv_until(&mut watcher, "user.joined").await;

    send(&mut alice, json!({"type": "user.positionUpdate", "position": {"x": 30.0, "y": 40.0}})).await;
    let (moved, _) = recv_until(&mut watcher, "user.moved").await;
    assert_eq!(moved["persistentId"], "alice");

    alice.close(None).await.unwrap();
    let (gone, _) = recv_until(&mut watcher, "user.disconnected").await;
    assert_eq!(gone["user"]["position"]["x"], 30.0);

    let mut alice = connect(addr).await;
    send(&mut alice, json!({"type": "identify", "persistentId": "alice"})).await;
    let (back, _) = recv_until(&mut watcher, "user.reconnected").await;
    assert_eq!(back["user"]["position"]["x"], 30.0);
    assert_eq!(back["user"]["position"]["y"], 40.0);

    // Alice's own snapshot no longer lists her as disconnected.
    let (ghosts, _) = recv_until(&mut alice, "users.disconnected").await;
    assert_eq!(ghosts["users"].as_array().unwrap().len(), 0);
}
