//! Integration tests for chat pairing.
//!
//! Real server, real WebSocket clients:
//! - a request for a registered user opens one session, announced to both
//! - a request for an unknown user is answered to the requester only
//! - repeated requests open distinct sessions
//! - a request for a user whose connection dropped reports `NotConnected`
//! - display names are unique among connected clients

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use sweetspeak::client::{Client, ClientEvent};
use sweetspeak_proto::connection::ConnectionOptions;
use sweetspeak_proto::message::Identity;
use sweetspeak_proto::retry::RetryPolicy;
use sweetspeak_server::config::ServerConfig;
use sweetspeak_server::server::{self, ServerHandle};

async fn start(sweep_interval: Duration) -> ServerHandle {
    let config = ServerConfig {
        sweep_interval,
        ..ServerConfig::local()
    };
    server::start_server_with_config(&config)
        .await
        .expect("failed to start server")
}

/// Connects `name` and waits until the server has registered it.
async fn join(server: &ServerHandle, name: &str) -> Client {
    let identity = Identity::new(format!("id-{name}"), name, "");
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

async fn assert_quiet(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.next_event()).await;
    assert!(result.is_err(), "unexpected event: {result:?}");
}

#[tokio::test]
async fn chat_request_opens_session_for_both() {
    let server = start(Duration::from_secs(1)).await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;

    alice.request_chat("bob").await.unwrap();

    let at_bob = next(&mut bob).await;
    let at_alice = next(&mut alice).await;
    assert_eq!(at_alice, at_bob);

    let ClientEvent::ChatOpened { chat_id, users } = at_alice else {
        panic!("expected ChatOpened, got {at_alice:?}");
    };
    assert!(!chat_id.is_empty());
    let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    assert_eq!(alice.active_chat().unwrap().id(), &chat_id);
    assert_eq!(bob.active_chat().unwrap().id(), &chat_id);
    assert_eq!(server.state().lock().await.sessions.len(), 1);
}

#[tokio::test]
async fn unknown_user_is_reported_to_requester_only() {
    let server = start(Duration::from_secs(1)).await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;

    alice.request_chat("carol").await.unwrap();

    assert_eq!(next(&mut alice).await, ClientEvent::UserNotFound("carol".into()));
    assert_quiet(&mut bob).await;
    assert!(alice.active_chat().is_none());
    assert!(server.state().lock().await.sessions.is_empty());
}

#[tokio::test]
async fn repeated_requests_open_distinct_sessions() {
    let server = start(Duration::from_secs(1)).await;
    let mut alice = join(&server, "alice").await;
    let mut bob = join(&server, "bob").await;

    alice.request_chat("bob").await.unwrap();
    let ClientEvent::ChatOpened { chat_id: first, .. } = next(&mut alice).await else {
        panic!("expected ChatOpened");
    };
    let _ = next(&mut bob).await;

    alice.request_chat("bob").await.unwrap();
    let ClientEvent::ChatOpened { chat_id: second, .. } = next(&mut alice).await else {
        panic!("expected ChatOpened");
    };
    let _ = next(&mut bob).await;

    assert_ne!(first, second);
    assert_eq!(server.state().lock().await.sessions.len(), 2);
}

#[tokio::test]
async fn disconnected_user_is_reported_before_sweep() {
    // Long sweep so the closed record is still present.
    let server = start(Duration::from_secs(60)).await;
    let mut alice = join(&server, "alice").await;
    let bob = join(&server, "bob").await;

    bob.close().await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let connected = server
            .state()
            .lock()
            .await
            .registry
            .lookup_by_name("bob")
            .is_some_and(sweetspeak_server::registry::ClientRecord::is_connected);
        if !connected {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "bob never flagged disconnected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    alice.request_chat("bob").await.unwrap();
    assert_eq!(next(&mut alice).await, ClientEvent::PeerNotConnected("bob".into()));
    assert!(server.state().lock().await.sessions.is_empty());
}

#[tokio::test]
async fn concurrent_registration_registers_both() {
    let server = start(Duration::from_secs(1)).await;

    let (alice, bob) = tokio::join!(join(&server, "alice"), join(&server, "bob"));

    let state = server.state().lock().await;
    assert_eq!(state.registry.len(), 2);
    assert!(state.registry.lookup_by_id("id-alice").is_some());
    assert!(state.registry.lookup_by_id("id-bob").is_some());
    drop(state);
    drop((alice, bob));
}

#[tokio::test]
async fn duplicate_display_name_is_turned_away() {
    let server = start(Duration::from_secs(1)).await;
    let _alice = join(&server, "alice").await;

    let impostor = Identity::new("id-other", "alice", "");
    let retry = RetryPolicy::fixed(1, Duration::from_millis(10));
    let options = ConnectionOptions::default();
    let mut second = Client::connect_with_retry(&server.url(), impostor, &retry, options)
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), second.next_event())
        .await
        .expect("server never closed the impostor");
    assert!(event.is_none());

    let state = server.state().lock().await;
    assert_eq!(state.registry.len(), 1);
    assert_eq!(state.registry.lookup_by_name("alice").unwrap().key(), "id-alice");
}
