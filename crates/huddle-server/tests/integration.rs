//! End-to-end tests with real WebSocket clients against servers sharing one
//! in-process bus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huddle_bus::{Bus, MemoryBus, SharedBus};
use huddle_core::Topic;
use huddle_server::{HuddleServer, ServerConfig};
use huddle_store::MemoryDirectory;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);
const SECRET: &str = "integration-secret";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn directory() -> Arc<MemoryDirectory> {
    let dir = Arc::new(MemoryDirectory::new());
    dir.add_user("A", "Alice", "https://cdn/a.png");
    dir.add_user("B", "Bob", "");
    dir.add_user("C", "Carol", "");
    for user in ["A", "B"] {
        dir.join_channel(user, "C1");
    }
    dir.join_channel("C", "C2");
    dir.add_conversation("CV1", "A", "B");
    dir
}

/// Boot a server on an ephemeral port.
async fn boot_server(bus: SharedBus, dir: Arc<MemoryDirectory>) -> (SocketAddr, HuddleServer) {
    let config = ServerConfig {
        jwt_secret: SECRET.into(),
        ..ServerConfig::default()
    };
    let server = HuddleServer::start(config, bus, dir).await.unwrap();
    let addr = server.listen().await.unwrap();
    (addr, server)
}

fn token(user: &str) -> String {
    let exp = jsonwebtoken::get_current_timestamp() + 3600;
    jsonwebtoken::encode(
        &Header::default(),
        &json!({ "sub": user, "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn connect(addr: SocketAddr, server: &HuddleServer, user: &str) -> WsStream {
    let before = server.registry().registry().connection_count();
    let (ws, _) = connect_async(format!("ws://{addr}/ws?token={}", token(user)))
        .await
        .unwrap();
    // Registration finishes after the handshake.
    timeout(TIMEOUT, async {
        while server.registry().registry().connection_count() == before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection registered");
    ws
}

/// Next JSON frame of the given type, skipping others.
async fn next_of_type(ws: &mut WsStream, kind: &str) -> Value {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} frame"))
}

/// Every frame of the given type received during a quiet period.
async fn collect_of_type(ws: &mut WsStream, kind: &str) -> Vec<Value> {
    let mut found = Vec::new();
    let deadline = tokio::time::Instant::now() + QUIET;
    while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] == kind {
                found.push(value);
            }
        }
    }
    found
}

#[tokio::test]
async fn missing_token_is_rejected_before_upgrade() {
    let (addr, _server) = boot_server(Arc::new(MemoryBus::default()), directory()).await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn channel_message_skips_all_sender_devices() {
    let bus = Arc::new(MemoryBus::default());
    let (addr, server) = boot_server(bus.clone(), directory()).await;
    let mut x = connect(addr, &server, "A").await;
    let mut y = connect(addr, &server, "A").await;
    let mut b = connect(addr, &server, "B").await;
    let mut c = connect(addr, &server, "C").await;

    let event = json!({
        "type": "message",
        "channelId": "C1",
        "message": { "id": "m1", "senderId": "A", "content": "hello" }
    });
    bus.publish(Topic::Broadcast, event.to_string()).await.unwrap();

    let got = next_of_type(&mut b, "message").await;
    assert_eq!(got["channelId"], "C1");
    assert_eq!(got["message"]["content"], "hello");
    assert!(collect_of_type(&mut x, "message").await.is_empty());
    assert!(collect_of_type(&mut y, "message").await.is_empty());
    assert!(collect_of_type(&mut c, "message").await.is_empty());
}

#[tokio::test]
async fn presence_is_user_level() {
    let bus: SharedBus = Arc::new(MemoryBus::default());
    let (addr, server) = boot_server(bus, directory()).await;
    let mut b = connect(addr, &server, "B").await;
    let own = next_of_type(&mut b, "user_status").await;
    assert_eq!(own["data"]["userId"], "B");

    let mut x = connect(addr, &server, "A").await;
    let online = next_of_type(&mut b, "user_status").await;
    assert_eq!(online["data"], json!({ "userId": "A", "status": "online" }));

    let mut y = connect(addr, &server, "A").await;
    assert!(collect_of_type(&mut b, "user_status").await.is_empty());

    x.close(None).await.unwrap();
    assert!(collect_of_type(&mut b, "user_status").await.is_empty());

    y.close(None).await.unwrap();
    let offline = next_of_type(&mut b, "user_status").await;
    assert_eq!(offline["data"], json!({ "userId": "A", "status": "offline" }));
    assert!(collect_of_type(&mut b, "user_status").await.is_empty());
    assert_eq!(server.registry().registry().user_count(), 1);
}

#[tokio::test]
async fn typing_crosses_instances_without_echo() {
    let bus: SharedBus = Arc::new(MemoryBus::default());
    let dir = directory();
    let (addr1, server1) = boot_server(Arc::clone(&bus), Arc::clone(&dir)).await;
    let (addr2, server2) = boot_server(bus, dir).await;

    let mut a = connect(addr1, &server1, "A").await;
    let mut b = connect(addr2, &server2, "B").await;

    a.send(Message::Text(
        json!({ "type": "typing", "conversationId": "CV1" }).to_string().into(),
    ))
    .await
    .unwrap();

    let typing = next_of_type(&mut b, "typing").await;
    assert_eq!(typing["conversationId"], "CV1");
    assert!(typing.get("channelId").is_none());
    assert_eq!(typing["data"]["userId"], "A");
    assert_eq!(typing["data"]["userDisplayName"], "Alice");
    assert_eq!(typing["data"]["userAvatar"], "https://cdn/a.png");
    assert!(collect_of_type(&mut a, "typing").await.is_empty());
}

#[tokio::test]
async fn shutdown_closes_client_sockets() {
    let (addr, server) = boot_server(Arc::new(MemoryBus::default()), directory()).await;
    let mut a = connect(addr, &server, "A").await;

    server.shutdown_gracefully().await;

    let ended = timeout(TIMEOUT, async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
