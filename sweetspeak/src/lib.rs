//! `SweetSpeak` client library.
//!
//! Connects to a server with a retry policy, introduces the local identity,
//! and tracks the active chat session. The `sweetspeak` binary wraps it in a
//! line-oriented terminal loop; the integration tests drive it directly.

pub mod client;
pub mod config;
pub mod input;
