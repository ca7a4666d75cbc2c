//! Client registry: who is connected, under which identity.
//!
//! Records are keyed by identity id. A record is created by a successful
//! handshake, flagged disconnected when its read pump stops, and removed by
//! the periodic sweep ([`ClientRegistry::evict_closed`]), not immediately.
//!
//! Display names are unique among connected records. A name held by a record
//! whose connection has already gone is released to the newcomer.

use std::collections::HashMap;
use std::sync::Arc;

use sweetspeak_proto::connection::Connection;
use sweetspeak_proto::message::Identity;

/// Errors from [`ClientRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another connected identity already uses this display name.
    #[error("display name {name:?} is held by {holder}")]
    NameTaken {
        /// The contested display name.
        name: String,
        /// Id of the identity currently holding it.
        holder: String,
    },

    /// The introduction carried no usable id or no display name.
    #[error("introduction carries an empty identity")]
    EmptyIdentity,
}

/// One registered client.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Identity the client introduced itself as. Its id is the registry key.
    pub identity: Identity,
    /// Client id from the introduction, kept for diagnostics.
    pub client_id: String,
    /// The client's connection.
    pub connection: Arc<Connection>,
    connected: bool,
}

impl ClientRecord {
    /// Builds a record from an introduction. An empty identity id falls back
    /// to the client id.
    pub fn new(
        mut identity: Identity,
        client_id: impl Into<String>,
        connection: Arc<Connection>,
    ) -> Self {
        let client_id = client_id.into();
        if identity.id.is_empty() {
            identity.id.clone_from(&client_id);
        }
        Self {
            identity,
            client_id,
            connection,
            connected: true,
        }
    }

    /// Registry key for this record.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.identity.id
    }

    /// Whether the client is still reachable: not flagged and not closed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected && !self.connection.is_closed()
    }
}

/// Outcome of a successful registration.
#[derive(Debug)]
pub enum Registration {
    /// No record existed for this id.
    New,
    /// A record for this id existed and was replaced. The caller closes the
    /// old connection.
    Replaced(ClientRecord),
}

/// Identity id to client record.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientRecord>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::EmptyIdentity`] if the record has no key or no name.
    /// - [`RegistryError::NameTaken`] if a different, connected identity holds
    ///   the same display name.
    pub fn register(&mut self, record: ClientRecord) -> Result<Registration, RegistryError> {
        if record.key().is_empty() || record.identity.name.is_empty() {
            return Err(RegistryError::EmptyIdentity);
        }

        let holder = self
            .clients
            .values()
            .find(|other| {
                other.identity.name == record.identity.name && other.key() != record.key()
            })
            .map(|other| (other.key().to_owned(), other.is_connected()));

        match holder {
            Some((holder, true)) => {
                return Err(RegistryError::NameTaken {
                    name: record.identity.name.clone(),
                    holder,
                });
            }
            Some((holder, false)) => {
                self.clients.remove(&holder);
                tracing::info!(
                    name = %record.identity.name,
                    stale = %holder,
                    "released display name held by disconnected client"
                );
            }
            None => {}
        }

        match self.clients.insert(record.key().to_owned(), record) {
            Some(old) => Ok(Registration::Replaced(old)),
            None => Ok(Registration::New),
        }
    }

    /// Looks a record up by identity id.
    #[must_use]
    pub fn lookup_by_id(&self, id: &str) -> Option<&ClientRecord> {
        self.clients.get(id)
    }

    /// Looks a record up by display name.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<&ClientRecord> {
        self.clients.values().find(|record| record.identity.name == name)
    }

    /// Flags the record under `id` as disconnected, provided it still holds
    /// `connection`. A record that has since been replaced is left alone.
    pub fn mark_disconnected(&mut self, id: &str, connection: &Arc<Connection>) -> bool {
        match self.clients.get_mut(id) {
            Some(record) if Arc::ptr_eq(&record.connection, connection) => {
                record.connected = false;
                true
            }
            _ => false,
        }
    }

    /// Removes every record whose connection is gone and returns them.
    pub fn evict_closed(&mut self) -> Vec<ClientRecord> {
        let stale: Vec<String> = self
            .clients
            .values()
            .filter(|record| !record.is_connected())
            .map(|record| record.key().to_owned())
            .collect();

        stale
            .iter()
            .filter_map(|key| self.clients.remove(key))
            .inspect(|record| {
                tracing::info!(client = %record.identity, "evicted disconnected client");
            })
            .collect()
    }

    /// Removes and returns every record.
    pub fn drain(&mut self) -> Vec<ClientRecord> {
        self.clients.drain().map(|(_, record)| record).collect()
    }

    /// Identities of every record, connected or not.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        self.clients.values().map(|record| record.identity.clone()).collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
