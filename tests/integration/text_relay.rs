//! Integration tests for text forwarding within chat sessions.
//!
//! - text reaches every participant verbatim and nobody else
//! - each of two sessions between one pair routes its own text
//! - an unreachable participant, first or last, does not stop delivery to the others

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use sweetspeak::client::{Client, ClientEvent};
use sweetspeak_proto::connection::ConnectionOptions;
use sweetspeak_proto::message::{ChatId, Identity, TextMessage};
use sweetspeak_proto::retry::RetryPolicy;
use sweetspeak_server::config::ServerConfig;
use sweetspeak_server::server::{self, ServerHandle};

async fn start() -> ServerHandle {
    let config = ServerConfig {
        sweep_interval: Duration::from_secs(60),
        ..ServerConfig::local()
    };
    server::start_server_with_config(&config)
        .await
        .expect("failed to start server")
}

async fn join(server: &ServerHandle, name: &str) -> Client {
    let identity = Identity::new(format!("id-{name}"), name, "69");
    let retry = RetryPolicy::fixed(3, Duration::from_millis(50));
    let options = ConnectionOptions::default();
    let client = Client::connect_with_retry(&server.url(), identity, &retry, options)
        .await
        .expect("connect failed");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.state().lock().await.registry.lookup_by_name(name).is_none() {
        assert!(tokio::time::Instant::now() < deadline, "{name} never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    client
}

async fn next(client: &mut Client) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("client disconnected")
}

async fn next_text(client: &mut Client) -> TextMessage {
    match next(client).await {
        ClientEvent::Message(text) => text,
        other => panic!("expected a message, got {other:?}"),
    }
}

async fn assert_quiet(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.next_event()).await;
    assert!(result.is_err(), "unexpected event: {result:?}");
}

/// Alice asks for a chat with Bob; returns the session id once both know it.
async fn pair(alice: &mut Client, bob: &mut Client) -> ChatId {
    alice.request_chat(&bob.identity().name).await.unwrap();
    let ClientEvent::ChatOpened { chat_id, .. } = next(bob).await else {
        panic!("expected ChatOpened at bob");
    };
    let _ = next(alice).await;
    chat_id
}

#[tokio::test]
async fn alice_and_bob_chat() {
    let server = start().await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;
    let mut carol = join(&server, "carol").await;

    let chat_id = pair(&mut alice, &mut bob).await;

    alice.send_text("hi bob").await.unwrap();
    let at_bob = next_text(&mut bob).await;
    assert_eq!(at_bob.content, "hi bob");
    assert_eq!(at_bob.from.name, "alice");
    assert_eq!(at_bob.chat_id, chat_id);
    assert_eq!(next_text(&mut alice).await.content, "hi bob");

    bob.send_text("hey alice").await.unwrap();
    let at_alice = next_text(&mut alice).await;
    assert_eq!(at_alice.content, "hey alice");
    assert_eq!(at_alice.from.name, "bob");
    assert_eq!(next_text(&mut bob).await.content, "hey alice");

    assert_quiet(&mut carol).await;

    let state = server.state().lock().await;
    let logged: Vec<&str> = state
        .sessions
        .lookup(&chat_id)
        .unwrap()
        .messages()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(logged, vec!["hi bob", "hey alice"]);
    drop(state);

    let contents: Vec<&str> = alice
        .active_chat()
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["hi bob", "hey alice"]);
}

#[tokio::test]
async fn alice_asks_for_carol_who_is_absent() {
    let server = start().await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;

    alice.request_chat("carol").await.unwrap();
    assert_eq!(next(&mut alice).await, ClientEvent::UserNotFound("carol".into()));
    assert!(alice.send_text("anyone?").await.is_err());
    assert_quiet(&mut bob).await;
}

#[tokio::test]
async fn each_session_routes_its_own_text() {
    let server = start().await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;

    let first = pair(&mut alice, &mut bob).await;
    alice.send_text("in the first").await.unwrap();
    let text = next_text(&mut bob).await;
    assert_eq!((text.chat_id, text.content.as_str()), (first.clone(), "in the first"));
    let _ = next_text(&mut alice).await;

    let second = pair(&mut alice, &mut bob).await;
    assert_ne!(first, second);
    alice.send_text("in the second").await.unwrap();
    let text = next_text(&mut bob).await;
    assert_eq!((text.chat_id, text.content.as_str()), (second, "in the second"));
}

#[tokio::test]
async fn departed_participant_does_not_block_delivery() {
    let server = start().await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;
    pair(&mut alice, &mut bob).await;

    bob.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.send_text("are you there?").await.unwrap();
    assert_eq!(next_text(&mut alice).await.content, "are you there?");
}

#[tokio::test]
async fn departed_requester_does_not_block_delivery() {
    let server = start().await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;
    pair(&mut alice, &mut bob).await;

    // Alice asked, so she is the first participant.
    alice.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.send_text("come back").await.unwrap();
    let text = next_text(&mut bob).await;
    assert_eq!(text.content, "come back");
    assert_eq!(text.from.name, "bob");
}
