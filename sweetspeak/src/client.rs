//! Chat client: connection, introduction, and local chat state.
//!
//! [`Client::connect_with_retry`] dials the server, starts the read pump,
//! and sends the Introduction, retrying the whole sequence under a
//! [`RetryPolicy`]. Afterwards [`Client::next_event`] turns server envelopes
//! into [`ClientEvent`]s and keeps the active [`ChatLog`] current.

use std::collections::VecDeque;
use std::sync::Arc;

use sweetspeak_proto::connection::{self, Connection, ConnectionError, ConnectionOptions};
use sweetspeak_proto::message::{ChatId, ChatStatus, Envelope, Identity, Payload, TextMessage};
use sweetspeak_proto::retry::RetryPolicy;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Every connection attempt failed.
    #[error("could not connect after {attempts} attempt(s): {source}")]
    Connect {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        source: ConnectionError,
    },

    /// Text was sent before any chat session was opened.
    #[error("no open chat; request one first")]
    NoChat,

    /// The connection failed after it was established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A chat session was opened, by us or by the peer.
    ChatOpened {
        /// The new session.
        chat_id: ChatId,
        /// Participants, requester first.
        users: Vec<Identity>,
    },
    /// A chat request named nobody registered.
    UserNotFound(String),
    /// A chat request named somebody whose connection has dropped.
    PeerNotConnected(String),
    /// Text in a chat session.
    Message(TextMessage),
}

/// Local record of the active chat session.
#[derive(Debug, Clone)]
pub struct ChatLog {
    id: ChatId,
    users: Vec<Identity>,
    messages: Vec<TextMessage>,
}

impl ChatLog {
    fn new(id: ChatId, users: Vec<Identity>) -> Self {
        Self {
            id,
            users,
            messages: Vec::new(),
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &ChatId {
        &self.id
    }

    /// Participants.
    #[must_use]
    pub fn users(&self) -> &[Identity] {
        &self.users
    }

    /// Messages received so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[TextMessage] {
        &self.messages
    }

    /// Title in the server's naming, `"<a> and <b>'s Chat"`.
    #[must_use]
    pub fn title(&self) -> String {
        match self.users.as_slice() {
            [a, b, ..] => format!("{} and {}'s Chat", a.name, b.name),
            [a] => format!("{}'s Chat", a.name),
            [] => "Chat".to_string(),
        }
    }
}

/// A connected, introduced chat client.
#[derive(Debug)]
pub struct Client {
    client_id: String,
    identity: Identity,
    connection: Arc<Connection>,
    chat: Option<ChatLog>,
    /// Names of outstanding chat requests, oldest first.
    pending: VecDeque<String>,
}

impl Client {
    /// Connects to `url` and introduces `identity`, retrying under `retry`.
    ///
    /// An invalid URL fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] with the last error once the policy
    /// is exhausted.
    pub async fn connect_with_retry(
        url: &str,
        identity: Identity,
        retry: &RetryPolicy,
        options: ConnectionOptions,
    ) -> Result<Self, ClientError> {
        let client_id = uuid::Uuid::now_v7().to_string();
        let mut failures = 0u32;

        loop {
            match introduce(url, &client_id, &identity, options.clone()).await {
                Ok(connection) => {
                    tracing::info!(
                        url = %url,
                        client_id = %client_id,
                        name = %identity.name,
                        "connected"
                    );
                    return Ok(Self {
                        client_id,
                        identity,
                        connection,
                        chat: None,
                        pending: VecDeque::new(),
                    });
                }
                Err(e) => {
                    failures += 1;
                    let fatal = matches!(e, ConnectionError::InvalidUrl(_));
                    if fatal || !retry.allows_retry(failures) {
                        tracing::error!(
                            url = %url,
                            attempts = failures,
                            error = %e,
                            "giving up connecting"
                        );
                        return Err(ClientError::Connect {
                            attempts: failures,
                            source: e,
                        });
                    }
                    let delay = retry.delay_for(failures);
                    tracing::warn!(
                        url = %url,
                        attempt = failures,
                        error = %e,
                        ?delay,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Per-process client id sent in the Introduction.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The identity this client introduced.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The chat session text is currently sent to.
    #[must_use]
    pub const fn active_chat(&self) -> Option<&ChatLog> {
        self.chat.as_ref()
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Asks the server to pair us with the identity named `to`.
    ///
    /// # Errors
    ///
    /// Returns the connection error if the request cannot be written.
    pub async fn request_chat(&mut self, to: &str) -> Result<(), ClientError> {
        let request = Envelope::chat_request(self.identity.name.clone(), to);
        self.connection.write(&request).await?;
        self.pending.push_back(to.to_string());
        tracing::debug!(to = %to, "chat request sent");
        Ok(())
    }

    /// Sends `content` to the active chat.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoChat`] if no chat is open, or the connection
    /// error if the text cannot be written.
    pub async fn send_text(&self, content: &str) -> Result<(), ClientError> {
        let chat = self.chat.as_ref().ok_or(ClientError::NoChat)?;
        let envelope = Envelope::text(chat.id.clone(), self.identity.clone(), content);
        self.connection.write(&envelope).await?;
        tracing::debug!(chat_id = %chat.id, "text sent");
        Ok(())
    }

    /// Waits for the next event. Returns `None` once the connection is closed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            let envelope = self.connection.read().await?;
            if let Some(event) = self.apply(envelope) {
                return Some(event);
            }
        }
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    fn apply(&mut self, envelope: Envelope) -> Option<ClientEvent> {
        match envelope.payload {
            Payload::ChatResponse(response) => match response.chat_status {
                ChatStatus::Open => {
                    if response.users.first() == Some(&self.identity) {
                        self.pending.pop_front();
                    }
                    tracing::info!(chat_id = %response.chat_id, "chat opened");
                    self.chat = Some(ChatLog::new(
                        response.chat_id.clone(),
                        response.users.clone(),
                    ));
                    Some(ClientEvent::ChatOpened {
                        chat_id: response.chat_id,
                        users: response.users,
                    })
                }
                ChatStatus::UserNotFound => {
                    let name = self.pending.pop_front().unwrap_or_default();
                    Some(ClientEvent::UserNotFound(name))
                }
                ChatStatus::NotConnected => {
                    let name = self.pending.pop_front().unwrap_or_default();
                    Some(ClientEvent::PeerNotConnected(name))
                }
            },
            Payload::Text(text) => {
                match self.chat.as_mut() {
                    Some(chat) if chat.id == text.chat_id => chat.messages.push(text.clone()),
                    _ => tracing::debug!(chat_id = %text.chat_id, "text for inactive chat"),
                }
                Some(ClientEvent::Message(text))
            }
            other => {
                tracing::debug!(kind = %other.kind(), "ignoring envelope");
                None
            }
        }
    }
}

async fn introduce(
    url: &str,
    client_id: &str,
    identity: &Identity,
    options: ConnectionOptions,
) -> Result<Arc<Connection>, ConnectionError> {
    let connection = connection::connect(url, options).await?;
    connection.start()?;
    let intro = Envelope::introduction(client_id, identity.clone());
    if let Err(e) = connection.write(&intro).await {
        connection.close().await;
        return Err(e);
    }
    Ok(connection)
}
