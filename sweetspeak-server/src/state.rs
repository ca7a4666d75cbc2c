//! Server-wide state behind the coarse lock.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::registry::ClientRegistry;
use crate::sessions::SessionStore;

/// Registry and session store, always locked together.
#[derive(Debug, Default)]
pub struct ServerState {
    /// Registered clients.
    pub registry: ClientRegistry,
    /// Open chat sessions.
    pub sessions: SessionStore,
}

/// Shared handle to the server state. The dispatcher holds the lock for the
/// whole handling of one envelope; registration and the sweep take it too.
pub type SharedState = Arc<Mutex<ServerState>>;

impl ServerState {
    /// Empty state keeping at most `max_session_log` messages per session.
    #[must_use]
    pub fn new(max_session_log: usize) -> Self {
        Self {
            registry: ClientRegistry::new(),
            sessions: SessionStore::new(max_session_log),
        }
    }

    /// Moves the state behind the coarse lock.
    #[must_use]
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }
}
