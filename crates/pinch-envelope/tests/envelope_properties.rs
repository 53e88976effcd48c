//! Property-based tests for envelope serialization, mirroring the
//! teacher's `filter_properties.rs` style: generate arbitrary field
//! values and assert round-trip and boundary invariants hold.

use pinch_envelope::{
    decode_envelope, encode_envelope, CLIENT_SEND_LIMIT_BYTES, Envelope, Payload, QueueStatus,
    RELAY_READ_LIMIT_BYTES,
};
use proptest::prelude::*;

fn envelope_with_pending(pending_count: u64, from: &str) -> Envelope {
    Envelope::new(
        1,
        from,
        None,
        None,
        Some(1_700_000_000_000),
        Payload::QueueStatus(QueueStatus { pending_count }),
    )
}

proptest! {
    #[test]
    fn prop_queue_status_round_trips(pending_count in any::<u64>(), addr_len in 1usize..64usize) {
        let from = "a".repeat(addr_len);
        let env = envelope_with_pending(pending_count, &from);
        let bytes = encode_envelope(&env, RELAY_READ_LIMIT_BYTES).unwrap();
        let decoded = decode_envelope(&bytes).unwrap();
        match decoded.payload {
            Payload::QueueStatus(q) => prop_assert_eq!(q.pending_count, pending_count),
            _ => prop_assert!(false, "wrong payload variant"),
        }
        prop_assert_eq!(decoded.from_address, from);
    }

    #[test]
    fn prop_content_under_client_limit_is_accepted(content_len in 0usize..50_000usize) {
        let env = Envelope::new(
            1,
            "pinch:sender@relay",
            Some("pinch:recipient@relay".to_string()),
            Some(vec![1, 2, 3]),
            Some(1),
            Payload::Heartbeat,
        );
        // Heartbeat alone is tiny; pad message_id to approximate a
        // variably-sized envelope without reaching into EncryptedPayload.
        let mut env = env;
        env.message_id = Some(vec![0u8; content_len]);
        let result = encode_envelope(&env, CLIENT_SEND_LIMIT_BYTES);
        if content_len < CLIENT_SEND_LIMIT_BYTES - 200 {
            prop_assert!(result.is_ok());
        }
    }
}

#[test]
fn envelope_over_relay_cap_is_rejected() {
    let mut env = envelope_with_pending(1, "pinch:sender@relay");
    env.message_id = Some(vec![0u8; RELAY_READ_LIMIT_BYTES + 1]);
    assert!(encode_envelope(&env, RELAY_READ_LIMIT_BYTES).is_err());
}

#[test]
fn envelope_at_client_cap_boundary() {
    // Construct an envelope whose encoded size sits just under the
    // client cap and confirm it is accepted, then push it over.
    let mut env = envelope_with_pending(1, "pinch:sender@relay");
    let baseline_len = encode_envelope(&env, usize::MAX).unwrap().len();
    let pad = CLIENT_SEND_LIMIT_BYTES.saturating_sub(baseline_len).saturating_sub(8);
    env.message_id = Some(vec![0u8; pad]);
    assert!(encode_envelope(&env, CLIENT_SEND_LIMIT_BYTES).is_ok());

    env.message_id = Some(vec![0u8; CLIENT_SEND_LIMIT_BYTES + 1]);
    assert!(encode_envelope(&env, CLIENT_SEND_LIMIT_BYTES).is_err());
}
