//! Chat sessions created by successful pairing requests.

use std::collections::{HashMap, VecDeque};

use sweetspeak_proto::message::{ChatId, Identity, TextMessage};

/// Default number of messages kept per session.
pub const DEFAULT_MAX_LOG: usize = 1000;

/// Errors from [`SessionStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with this id exists.
    #[error("chat session {0} not found")]
    NotFound(ChatId),
}

/// A paired conversation. Participants are fixed at creation; the log is
/// append-only apart from dropping the oldest entries past the cap.
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: ChatId,
    name: String,
    participants: Vec<Identity>,
    messages: VecDeque<TextMessage>,
}

impl ChatSession {
    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &ChatId {
        &self.id
    }

    /// Human readable title, `"<a> and <b>'s Chat"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Participants in pairing order (requester first).
    #[must_use]
    pub fn participants(&self) -> &[Identity] {
        &self.participants
    }

    /// Whether `identity` takes part in this session.
    #[must_use]
    pub fn has_participant(&self, identity: &Identity) -> bool {
        self.participants.contains(identity)
    }

    /// Logged messages, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &TextMessage> {
        self.messages.iter()
    }
}

/// Session id to chat session.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<ChatId, ChatSession>,
    max_log: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG)
    }
}

impl SessionStore {
    /// Creates an empty store keeping at most `max_log` messages per session.
    #[must_use]
    pub fn new(max_log: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_log: max_log.max(1),
        }
    }

    /// Opens a session between `a` and `b` under a fresh id. Repeated
    /// pairings of the same identities open distinct sessions.
    pub fn create_session(&mut self, a: Identity, b: Identity) -> ChatId {
        let id = ChatId::generate();
        let session = ChatSession {
            id: id.clone(),
            name: format!("{} and {}'s Chat", a.name, b.name),
            participants: vec![a, b],
            messages: VecDeque::new(),
        };
        tracing::info!(chat_id = %id, name = %session.name, "chat session created");
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Looks a session up by id.
    #[must_use]
    pub fn lookup(&self, id: &ChatId) -> Option<&ChatSession> {
        self.sessions.get(id)
    }

    /// Appends a message to a session's log.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if no session has this id.
    pub fn append_message(
        &mut self,
        id: &ChatId,
        message: TextMessage,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        if session.messages.len() >= self.max_log {
            session.messages.pop_front();
        }
        session.messages.push_back(message);
        Ok(())
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
