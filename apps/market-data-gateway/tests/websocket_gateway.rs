//! WebSocket Gateway Integration Tests
//!
//! Serves the real axum router on an ephemeral port and talks to it with a
//! `tokio-tungstenite` client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use market_data_gateway::{
    ConnectionGateway, GatewayServer, Order, SubscriptionHub, TopicParams, UserId,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestGateway {
    hub: Arc<SubscriptionHub>,
    base_url: String,
    cancel: CancellationToken,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_gateway() -> TestGateway {
    let hub = Arc::new(SubscriptionHub::with_defaults());
    hub.register_topic_instance(TopicParams::ticker("BTCUSD"));
    hub.register_topic_instance(TopicParams::order_book("BTCUSD", 2));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = GatewayServer::new(
        addr.port(),
        Arc::new(ConnectionGateway::new(Arc::clone(&hub))),
        cancel.clone(),
    );
    tokio::spawn(async move { server.serve(listener).await.unwrap() });

    TestGateway {
        hub,
        base_url: format!("ws://{addr}"),
        cancel,
    }
}

async fn connect(gateway: &TestGateway, user: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("{}/ws/{user}", gateway.base_url))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, command: &Value) {
    client
        .send(Message::Text(command.to_string().into()))
        .await
        .unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("frame in time")
            .expect("connection open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn subscribe_and_receive_broadcasts() {
    let gateway = start_gateway().await;
    let mut client = connect(&gateway, "42").await;

    send(
        &mut client,
        &json!({"action": "subscribe", "topic": "ticker", "params": {"pair": "BTCUSD"}}),
    )
    .await;
    assert_eq!(
        recv(&mut client).await,
        json!({"topic": "ticker", "status": "subscribed"})
    );

    gateway
        .hub
        .broadcast(&TopicParams::ticker("BTCUSD"), &json!({"lastPrice": "100"}))
        .unwrap();
    assert_eq!(
        recv(&mut client).await,
        json!({"topic": "ticker", "params": {"lastPrice": "100"}})
    );

    send(
        &mut client,
        &json!({"action": "unsubscribe", "topic": "ticker", "params": {"pair": "BTCUSD"}}),
    )
    .await;
    assert_eq!(recv(&mut client).await["status"], "unsubscribed");
    assert_eq!(gateway.hub.subscriber_count(&TopicParams::ticker("BTCUSD")), 0);
}

#[tokio::test]
async fn rejected_commands_are_answered_with_errors() {
    let gateway = start_gateway().await;
    let mut client = connect(&gateway, "42").await;

    send(
        &mut client,
        &json!({"action": "subscribe", "topic": "orderBok", "params": {}}),
    )
    .await;
    assert_eq!(
        recv(&mut client).await,
        json!({"error": "no such topic exists: orderBok"})
    );

    send(
        &mut client,
        &json!({"action": "subscribe", "topic": "orderBook", "params": {"pair": "BTCUSD", "precision": 3}}),
    )
    .await;
    assert_eq!(
        recv(&mut client).await,
        json!({"error": "this topic does not have such parameters: orderBook(pair=BTCUSD, precision=3)"})
    );

    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    let reply = recv(&mut client).await;
    assert!(reply["error"].as_str().unwrap().starts_with("malformed request:"));
}

#[tokio::test]
async fn invalid_user_id_is_rejected_before_upgrade() {
    let gateway = start_gateway().await;

    for user in ["abc", "0", "-5"] {
        let result =
            tokio_tungstenite::connect_async(format!("{}/ws/{user}", gateway.base_url)).await;
        match result {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 400),
            other => panic!("expected HTTP 400 for {user}, got {other:?}"),
        }
    }
    assert_eq!(gateway.hub.stats().connections, 0);
}

#[tokio::test]
async fn order_updates_reach_every_connection_of_the_user() {
    let gateway = start_gateway().await;
    let mut first = connect(&gateway, "42").await;
    let mut second = connect(&gateway, "42").await;
    let user = UserId::try_from(42).unwrap();
    eventually(|| gateway.hub.user_connection_count(user) == 2).await;

    let order: Order = serde_json::from_value(json!({
        "orderID": 9,
        "userID": 42,
        "isBid": true,
        "pair": "BTCUSD",
        "price": "100",
        "qty": "1",
        "sizeFilled": "1",
        "status": "filled",
        "type": "limit",
        "createdAt": "2024-01-01T00:00:00Z"
    }))
    .unwrap();
    assert_eq!(gateway.hub.notify_order_updates(&[order]), 2);

    for client in [&mut first, &mut second] {
        let frame = recv(client).await;
        assert_eq!(frame["topic"], "orderUpdate");
        assert_eq!(frame["order"]["orderID"], 9);
    }
}

#[tokio::test]
async fn closing_the_socket_cleans_up_the_connection() {
    let gateway = start_gateway().await;
    let mut client = connect(&gateway, "42").await;
    send(
        &mut client,
        &json!({"action": "subscribe", "topic": "orderBook", "params": {"pair": "BTCUSD", "precision": 2}}),
    )
    .await;
    recv(&mut client).await;
    assert_eq!(gateway.hub.stats().connections, 1);

    client.close(None).await.unwrap();

    eventually(|| gateway.hub.stats().connections == 0).await;
    assert_eq!(gateway.hub.stats().users, 0);
    assert_eq!(
        gateway
            .hub
            .subscriber_count(&TopicParams::order_book("BTCUSD", 2)),
        0
    );
}
