//! `SweetSpeak` relay server library.
//!
//! Accepts WebSocket connections, identifies each client through an
//! Introduction handshake, pairs clients into chat sessions on request, and
//! forwards text only between the members of a session. Exposed as a library
//! for the binary, tests, and embedding.

pub mod config;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod sessions;
pub mod state;
