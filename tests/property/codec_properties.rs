//! Property tests for the envelope codec and retry backoff.
//!
//! 1. Any well-formed `Envelope` survives encode then decode.
//! 2. Random bytes never panic in `decode`.
//! 3. A payload re-tagged with a different kind never decodes.
//! 4. Backoff delays never shrink and never exceed the cap.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use proptest::prelude::*;
use sweetspeak_proto::codec::{self, CodecError};
use sweetspeak_proto::message::*;
use sweetspeak_proto::retry::RetryPolicy;
use uuid::Uuid;

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<u128>().prop_map(|n| MessageId::from_uuid(Uuid::from_u128(n)))
}

fn arb_identity() -> impl Strategy<Value = Identity> {
    ("[a-z0-9-]{1,36}", "\\PC{1,32}", "[0-9]{0,3}")
        .prop_map(|(id, name, color)| Identity::new(id, name, color))
}

fn arb_chat_id() -> impl Strategy<Value = ChatId> {
    prop_oneof![
        Just(ChatId::default()),
        any::<u128>().prop_map(|n| ChatId::new(Uuid::from_u128(n).to_string())),
    ]
}

fn arb_status() -> impl Strategy<Value = ChatStatus> {
    prop_oneof![
        Just(ChatStatus::Open),
        Just(ChatStatus::UserNotFound),
        Just(ChatStatus::NotConnected),
    ]
}

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        ("\\PC{0,40}", arb_identity()).prop_map(|(client_id, user)| {
            Payload::Introduction(Introduction { client_id, user })
        }),
        (arb_chat_id(), arb_identity(), any::<u64>(), "\\PC{0,512}").prop_map(
            |(chat_id, from, ts, content)| Payload::Text(TextMessage {
                chat_id,
                from,
                timestamp: Timestamp::from_millis(ts),
                content,
            })
        ),
        ("\\PC{0,32}", "\\PC{0,32}", any::<u64>(), any::<bool>()).prop_map(
            |(from, to, ts, online)| Payload::Status(StatusUpdate {
                from,
                to,
                timestamp: Timestamp::from_millis(ts),
                online,
            })
        ),
        ("\\PC{0,32}", "\\PC{0,32}")
            .prop_map(|(from, to)| Payload::ChatRequest(ChatRequest { from, to })),
        (
            arb_chat_id(),
            prop::collection::vec(arb_identity(), 0..4),
            arb_status()
        )
            .prop_map(|(chat_id, users, chat_status)| Payload::ChatResponse(
                ChatResponse {
                    chat_id,
                    users,
                    chat_status,
                }
            )),
    ]
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (arb_message_id(), arb_payload()).prop_map(|(message_id, payload)| Envelope {
        message_id,
        payload,
    })
}

proptest! {
    #[test]
    fn envelope_round_trip(envelope in arb_envelope()) {
        let text = codec::encode(&envelope).expect("encode should succeed");
        let decoded = codec::decode(text.as_bytes()).expect("decode should succeed");
        prop_assert_eq!(envelope.kind(), decoded.kind());
        prop_assert_eq!(envelope, decoded);
    }

    /// Random bytes are rejected with an error, never a panic.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    /// Swapping the kind tag of a valid envelope makes it undecodable.
    ///
    /// Payload decoding rejects unknown and missing fields, and no two
    /// payload shapes share a field set.
    #[test]
    fn retagged_payload_is_rejected(envelope in arb_envelope(), shift in 1u8..5) {
        let text = codec::encode(&envelope).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let foreign = (envelope.kind().code() + shift) % 5;
        value["message_type"] = serde_json::Value::from(foreign);

        let result = codec::decode(value.to_string().as_bytes());
        let is_mismatch = matches!(result, Err(CodecError::PayloadMismatch { .. }));
        prop_assert!(is_mismatch);
    }

    #[test]
    fn backoff_is_monotonic_and_capped(
        initial_ms in 1u64..1_000,
        cap_ms in 1u64..10_000,
        multiplier in 1.0f64..4.0,
        failures in 1u32..64,
    ) {
        let policy = RetryPolicy {
            max_attempts: 64,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(cap_ms),
            multiplier,
        };
        let here = policy.delay_for(failures);
        let next = policy.delay_for(failures + 1);
        prop_assert!(here <= policy.max_delay);
        prop_assert!(next >= here);
    }
}
