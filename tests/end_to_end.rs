#![cfg(feature = "memory")]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use subjecthub::transport::{self, memory};
use subjecthub::{Hub, Metadata, MemoryPubSub, Method, PubSub, Response, Station};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_subscribe_relay_disconnect() {
    let hub = Arc::new(Hub::default());
    let pubsub = Arc::new(MemoryPubSub::new());
    let station = Station::start(pubsub.clone(), hub.clone(), &["*".to_string()])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (source, sink, mut client) = memory::pair();
    let handle = hub.open(Metadata::new(), source, sink);
    let id = handle.id().clone();
    assert!(hub.verify(&id));

    // Not ready yet
    client.send_json(&json!({"id": id, "method": 1, "params": ["orders.*"]}));
    let response = client.recv_response().await.unwrap();
    assert_eq!(response.code, 400);
    assert_eq!(response.message, "connect not ready");
    assert!(handle.topics().is_empty());

    client.send_json(&json!({"id": id, "method": 0}));
    let response = client.recv_response().await.unwrap();
    assert_eq!(response.method, Some(Method::Ping));
    assert!(handle.is_ready());

    client.send_json(&json!({"id": id, "method": 1, "params": ["orders.*"]}));
    let response = client.recv_response().await.unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(response.data, json!(["orders.*"]));

    pubsub
        .publish("orders.created", br#"{"order":7}"#)
        .await
        .unwrap();
    let response = tokio::time::timeout(WAIT, client.recv_response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.method, Some(Method::Broadcast));
    assert_eq!(response.id, id);
    assert_eq!(response.data["subject"], "orders.created");
    assert_eq!(response.data["payload"], json!({"order": 7}));
    assert!(response.data["timestamp"].is_string());

    // Outside the subscription
    pubsub.publish("users.created", b"{}").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.try_recv().is_none());

    client.send_json(&json!({"id": id, "method": 3, "params": {}}));
    tokio::time::timeout(WAIT, handle.closed()).await.unwrap();
    assert!(!hub.verify(&id));
    assert_eq!(hub.session_count(), 0);

    station.shutdown();
}

#[tokio::test]
async fn test_sessions_receive_only_their_subjects() {
    let hub = Arc::new(Hub::default());
    let mut clients = Vec::new();

    for pattern in ["orders.*", "users.*"] {
        let (source, sink, mut client) = memory::pair();
        let handle = hub.open(Metadata::new(), source, sink);
        let id = handle.id().clone();

        client.send_json(&json!({"id": id, "method": 0}));
        client.recv_response().await.unwrap();
        client.send_json(&json!({"id": id, "method": 1, "params": [pattern]}));
        client.recv_response().await.unwrap();
        clients.push(client);
    }

    subjecthub::station::relay(&hub, "users.deleted".to_string(), b"\"bye\"");

    let response = tokio::time::timeout(WAIT, clients[1].recv_response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.data["payload"], "bye");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(clients[0].try_recv().is_none());
}

#[tokio::test]
async fn test_websocket_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = Arc::new(Hub::default());

    let server_hub = hub.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (source, sink) = transport::split(ws);
        server_hub.open(Metadata::new(), source, sink)
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    let handle = server.await.unwrap();
    let id = handle.id().clone();

    let ping = json!({"id": id, "method": 0}).to_string();
    ws.send(Message::text(ping)).await.unwrap();

    let frame = loop {
        match tokio::time::timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    };
    let response: Response = serde_json::from_str(frame.as_str()).unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(response.method, Some(Method::Ping));

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
    .await
    .unwrap();

    tokio::time::timeout(WAIT, handle.closed()).await.unwrap();
    assert!(!hub.verify(&id));
}
