//! Shared protocol definitions for the `SweetSpeak` wire format.
//!
//! Holds the envelope types and their JSON codec, plus the [`connection`]
//! handler used on both sides of a WebSocket.

pub mod codec;
pub mod connection;
pub mod loopback;
pub mod message;
pub mod retry;
