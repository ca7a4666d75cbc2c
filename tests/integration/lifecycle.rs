//! Integration tests for connection lifecycle on a live server.
//!
//! - a closed client is evicted within two sweep intervals
//! - a frame that does not decode is dropped and the connection carries on
//! - a replacement connection for the same identity takes over
//! - shutdown disconnects every client

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sweetspeak::client::{Client, ClientEvent};
use sweetspeak_proto::codec;
use sweetspeak_proto::connection::ConnectionOptions;
use sweetspeak_proto::message::{ChatId, ChatStatus, Envelope, Identity, Payload};
use sweetspeak_proto::retry::RetryPolicy;
use sweetspeak_server::config::ServerConfig;
use sweetspeak_server::server::{self, ServerHandle};
use tokio_tungstenite::tungstenite::Message;

const SWEEP: Duration = Duration::from_millis(100);

async fn start() -> ServerHandle {
    let config = ServerConfig {
        sweep_interval: SWEEP,
        ..ServerConfig::local()
    };
    server::start_server_with_config(&config)
        .await
        .expect("failed to start server")
}

async fn wait_until<F>(server: &ServerHandle, what: &str, mut check: F)
where
    F: FnMut(&sweetspeak_server::state::ServerState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check(&*server.state().lock().await) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting: {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn join(server: &ServerHandle, id: &str, name: &str) -> Client {
    let identity = Identity::new(id, name, "");
    let retry = RetryPolicy::fixed(3, Duration::from_millis(50));
    Client::connect_with_retry(&server.url(), identity, &retry, ConnectionOptions::default())
        .await
        .expect("connect failed")
}

#[tokio::test]
async fn closed_client_is_evicted_by_sweep() {
    let server = start().await;
    let alice = join(&server, "id-alice", "alice").await;
    wait_until(&server, "alice registered", |s| s.registry.len() == 1).await;

    alice.close().await;
    let closed_at = tokio::time::Instant::now();
    wait_until(&server, "alice evicted", |s| s.registry.is_empty()).await;
    assert!(
        closed_at.elapsed() <= SWEEP * 2,
        "evicted after {:?}, more than two sweep intervals",
        closed_at.elapsed()
    );
}

#[tokio::test]
async fn malformed_frame_is_ignored() {
    let server = start().await;
    let mut bob = join(&server, "id-bob", "bob").await;

    let (mut raw, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    let intro = Envelope::introduction("raw-1", Identity::new("id-alice", "alice", ""));
    raw.send(Message::text(codec::encode(&intro).unwrap())).await.unwrap();
    wait_until(&server, "both registered", |s| s.registry.len() == 2).await;

    raw.send(Message::text("{\"message_type\": 99}")).await.unwrap();
    raw.send(Message::binary(vec![0xde, 0xad, 0xbe, 0xef])).await.unwrap();
    let request = Envelope::chat_request("alice", "bob");
    raw.send(Message::text(codec::encode(&request).unwrap())).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), bob.next_event())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ClientEvent::ChatOpened { .. }));
}

#[tokio::test]
async fn reconnecting_identity_replaces_old_connection() {
    let server = start().await;
    let mut first = join(&server, "id-alice", "alice").await;
    wait_until(&server, "alice registered", |s| s.registry.len() == 1).await;

    let mut second = join(&server, "id-alice", "alice").await;
    let closed = tokio::time::timeout(Duration::from_secs(5), first.next_event())
        .await
        .unwrap();
    assert!(closed.is_none());

    wait_until(&server, "replacement registered", |s| {
        s.registry
            .lookup_by_id("id-alice")
            .is_some_and(|r| r.client_id == second.client_id())
    })
    .await;

    // The replacement is fully usable.
    let _bob = join(&server, "id-bob", "bob").await;
    wait_until(&server, "bob registered", |s| s.registry.len() == 2).await;
    second.request_chat("bob").await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), second.next_event())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ClientEvent::ChatOpened { .. }));
}

#[tokio::test]
async fn wrong_first_message_is_turned_away() {
    let server = start().await;
    let (mut raw, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    let response = Envelope::chat_response(ChatId::generate(), vec![], ChatStatus::Open);
    raw.send(Message::text(codec::encode(&response).unwrap())).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match raw.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(Message::Text(text))) => {
                    let envelope = codec::decode(text.as_bytes()).unwrap();
                    assert!(!matches!(envelope.payload, Payload::ChatResponse(_)));
                }
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "connection was not closed");
    assert!(server.state().lock().await.registry.is_empty());
}

#[tokio::test]
async fn shutdown_disconnects_clients() {
    let server = start().await;
    let mut alice = join(&server, "id-alice", "alice").await;
    wait_until(&server, "alice registered", |s| s.registry.len() == 1).await;

    server.shutdown().await;

    let event = tokio::time::timeout(Duration::from_secs(5), alice.next_event())
        .await
        .unwrap();
    assert!(event.is_none());
}
