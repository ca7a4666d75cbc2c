//! Serialization and deserialization for the `SweetSpeak` wire protocol.
//!
//! An envelope travels as one JSON object:
//!
//! ```json
//! {"message_id": "0190…", "message_type": 3, "payload": {"from": "alice", "to": "bob"}}
//! ```
//!
//! Decoding is two-phase. The outer object is read with the payload left as
//! an untyped JSON value; the `message_type` tag then selects the payload
//! type, which is decoded strictly (unknown fields rejected). A payload that
//! does not fit its tag is therefore an error rather than a silent mismatch.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::message::{Envelope, MessageId, MessageKind, Payload};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is not a well-formed envelope object.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// The `message_type` tag names no known kind.
    #[error("unknown message type {0}")]
    UnknownKind(u8),
    /// The payload does not have the shape its kind tag requires.
    #[error("payload does not match message type {kind}: {reason}")]
    PayloadMismatch {
        /// Kind named by the tag.
        kind: MessageKind,
        /// Why the payload was rejected.
        reason: String,
    },
}

#[derive(Serialize)]
struct WireEnvelopeRef<'a> {
    message_id: &'a MessageId,
    message_type: MessageKind,
    payload: &'a Payload,
}

#[derive(Deserialize)]
struct WireEnvelope {
    message_id: MessageId,
    message_type: u8,
    payload: serde_json::Value,
}

/// Encodes an [`Envelope`] into its JSON text form.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the envelope cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let wire = WireEnvelopeRef {
        message_id: &envelope.message_id,
        message_type: envelope.kind(),
        payload: &envelope.payload,
    };
    serde_json::to_string(&wire).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an [`Envelope`] from a frame's bytes.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the bytes are not an envelope object,
/// `CodecError::UnknownKind` for an unrecognised tag, or
/// `CodecError::PayloadMismatch` if the payload does not fit the tag.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let wire: WireEnvelope =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let kind = MessageKind::try_from(wire.message_type)
        .map_err(|_| CodecError::UnknownKind(wire.message_type))?;

    let payload = match kind {
        MessageKind::Introduction => Payload::Introduction(payload_as(kind, wire.payload)?),
        MessageKind::Text => Payload::Text(payload_as(kind, wire.payload)?),
        MessageKind::Status => Payload::Status(payload_as(kind, wire.payload)?),
        MessageKind::ChatRequest => Payload::ChatRequest(payload_as(kind, wire.payload)?),
        MessageKind::ChatResponse => Payload::ChatResponse(payload_as(kind, wire.payload)?),
    };

    Ok(Envelope {
        message_id: wire.message_id,
        payload,
    })
}

fn payload_as<T: DeserializeOwned>(
    kind: MessageKind,
    value: serde_json::Value,
) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::PayloadMismatch {
        kind,
        reason: e.to_string(),
    })
}
