//! Message dispatch: the single consumer of the shared inbound queue.
//!
//! Every connection's read pump feeds `(client, envelope)` pairs into one
//! bounded queue. The [`Dispatcher`] pops them one at a time and, holding
//! the server-wide lock for the whole step, routes each:
//!
//! - `ChatRequest` pairs the requester with the named identity and answers
//!   with a `ChatResponse`
//! - `Text` is logged in its session and forwarded to every participant
//! - anything else is ignored
//!
//! Forwarding writes are bounded by [`DispatchConfig::write_timeout`] so one
//! stalled peer delays the queue by at most that long.

use std::time::Duration;

use sweetspeak_proto::connection::{Connection, ConnectionError};
use sweetspeak_proto::message::{
    ChatId, ChatRequest, ChatStatus, Envelope, Identity, Payload, TextMessage,
};
use tokio::sync::mpsc;

use crate::state::{ServerState, SharedState};

/// One envelope read from a registered client.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Registry key of the client the envelope arrived from.
    pub client_key: String,
    /// The decoded envelope.
    pub envelope: Envelope,
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on one forwarded write.
    pub write_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Errors from handling one envelope. None of them stop the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The originating client is no longer registered.
    #[error("envelope from unregistered client {0}")]
    UnknownSender(String),

    /// A text message named a session that does not exist.
    #[error("chat session {0} not found")]
    SessionNotFound(ChatId),

    /// A text message was sent to a session its author is not part of.
    #[error("{sender} is not a participant of chat {chat_id}")]
    NotParticipant {
        /// Session named by the message.
        chat_id: ChatId,
        /// Display name of the author.
        sender: String,
    },

    /// The reply to a client could not be written.
    #[error("failed to write to {recipient}: {source}")]
    Write {
        /// Display name of the recipient.
        recipient: String,
        /// Underlying connection error.
        source: ConnectionError,
    },

    /// Some participants could not be reached. The rest were.
    #[error("chat {chat_id}: delivery failed for {}", .failed.join(", "))]
    PartialDelivery {
        /// Session the envelope belonged to.
        chat_id: ChatId,
        /// Display names of the unreachable participants.
        failed: Vec<String>,
    },
}

/// Drains the shared inbound queue until every producer is gone.
pub struct Dispatcher {
    state: SharedState,
    queue: mpsc::Receiver<Inbound>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher over `state`, consuming `queue`.
    #[must_use]
    pub const fn new(
        state: SharedState,
        queue: mpsc::Receiver<Inbound>,
        config: DispatchConfig,
    ) -> Self {
        Self { state, queue, config }
    }

    /// Runs the dispatch loop.
    pub async fn run(mut self) {
        tracing::info!("dispatcher started");
        while let Some(Inbound { client_key, envelope }) = self.queue.recv().await {
            let kind = envelope.kind();
            let mut state = self.state.lock().await;
            if let Err(e) = dispatch(&mut state, &client_key, envelope, &self.config).await {
                tracing::warn!(client = %client_key, %kind, error = %e, "dispatch failed");
            }
        }
        tracing::info!("inbound queue closed, dispatcher stopping");
    }
}

/// Handles one envelope from the client registered under `client_key`.
///
/// # Errors
///
/// Returns a [`DispatchError`] describing what could not be done. Other
/// recipients are still served when one fails.
pub async fn dispatch(
    state: &mut ServerState,
    client_key: &str,
    envelope: Envelope,
    config: &DispatchConfig,
) -> Result<(), DispatchError> {
    let Some(sender) = state.registry.lookup_by_id(client_key).map(|r| r.identity.clone()) else {
        return Err(DispatchError::UnknownSender(client_key.to_owned()));
    };

    match envelope.payload {
        Payload::ChatRequest(request) => handle_chat_request(state, &sender, request, config).await,
        Payload::Text(text) => handle_text(state, &sender, text, config).await,
        other => {
            tracing::debug!(client = %sender, kind = %other.kind(), "ignoring envelope");
            Ok(())
        }
    }
}

async fn handle_chat_request(
    state: &mut ServerState,
    requester: &Identity,
    request: ChatRequest,
    config: &DispatchConfig,
) -> Result<(), DispatchError> {
    if request.from != requester.name {
        tracing::debug!(
            claimed = %request.from,
            registered = %requester.name,
            "chat request names a different requester, using registered identity"
        );
    }

    let Some(requester_conn) = state
        .registry
        .lookup_by_id(&requester.id)
        .map(|r| r.connection.clone())
    else {
        return Err(DispatchError::UnknownSender(requester.id.clone()));
    };

    let target = state
        .registry
        .lookup_by_name(&request.to)
        .map(|r| (r.identity.clone(), r.connection.clone(), r.is_connected()));

    let (target, target_conn) = match target {
        None => {
            tracing::info!(
                from = %requester.name,
                to = %request.to,
                "chat request for unknown user"
            );
            let response =
                Envelope::chat_response(ChatId::default(), vec![], ChatStatus::UserNotFound);
            return reply(&requester_conn, &requester.name, &response, config).await;
        }
        Some((target, _, false)) => {
            tracing::info!(
                from = %requester.name,
                to = %target.name,
                "chat request for disconnected user"
            );
            let response =
                Envelope::chat_response(ChatId::default(), vec![], ChatStatus::NotConnected);
            return reply(&requester_conn, &requester.name, &response, config).await;
        }
        Some((target, conn, true)) => (target, conn),
    };

    let chat_id = state.sessions.create_session(requester.clone(), target.clone());
    let users = vec![requester.clone(), target.clone()];

    let mut failed = Vec::new();
    for (name, conn) in [(&target.name, &target_conn), (&requester.name, &requester_conn)] {
        let response = Envelope::chat_response(chat_id.clone(), users.clone(), ChatStatus::Open);
        if let Err(e) = deliver(conn, &response, config.write_timeout).await {
            tracing::warn!(
                chat_id = %chat_id,
                to = %name,
                error = %e,
                "failed to send chat response"
            );
            failed.push(name.clone());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::PartialDelivery { chat_id, failed })
    }
}

async fn handle_text(
    state: &mut ServerState,
    sender: &Identity,
    text: TextMessage,
    config: &DispatchConfig,
) -> Result<(), DispatchError> {
    let chat_id = text.chat_id.clone();
    let Some(session) = state.sessions.lookup(&chat_id) else {
        return Err(DispatchError::SessionNotFound(chat_id));
    };
    if !session.has_participant(sender) {
        return Err(DispatchError::NotParticipant {
            chat_id,
            sender: sender.name.clone(),
        });
    }
    let participants = session.participants().to_vec();

    let message = TextMessage {
        from: sender.clone(),
        ..text
    };
    state
        .sessions
        .append_message(&chat_id, message.clone())
        .map_err(|_| DispatchError::SessionNotFound(chat_id.clone()))?;

    let mut failed = Vec::new();
    for participant in &participants {
        let Some(conn) = state
            .registry
            .lookup_by_name(&participant.name)
            .map(|r| r.connection.clone())
        else {
            tracing::warn!(
                chat_id = %chat_id,
                to = %participant.name,
                "participant not registered"
            );
            failed.push(participant.name.clone());
            continue;
        };

        let envelope = Envelope::new(Payload::Text(message.clone()));
        if let Err(e) = deliver(&conn, &envelope, config.write_timeout).await {
            tracing::warn!(
                chat_id = %chat_id,
                to = %participant.name,
                error = %e,
                "failed to forward text"
            );
            failed.push(participant.name.clone());
        }
    }

    if failed.is_empty() {
        tracing::debug!(chat_id = %chat_id, from = %sender.name, "text forwarded");
        Ok(())
    } else {
        Err(DispatchError::PartialDelivery { chat_id, failed })
    }
}

async fn reply(
    conn: &Connection,
    recipient: &str,
    envelope: &Envelope,
    config: &DispatchConfig,
) -> Result<(), DispatchError> {
    deliver(conn, envelope, config.write_timeout)
        .await
        .map_err(|source| DispatchError::Write {
            recipient: recipient.to_owned(),
            source,
        })
}

/// Writes `envelope`, giving up after `timeout`.
async fn deliver(
    conn: &Connection,
    envelope: &Envelope,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    tokio::time::timeout(timeout, conn.write(envelope))
        .await
        .map_err(|_| ConnectionError::Timeout)?
}
