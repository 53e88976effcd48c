//! A message sent to a peer who has never connected sits in the
//! relay's durable queue, then gets flushed (announced by
//! `QueueStatus`, decremented by `waitForFlush`) once the recipient
//! finally connects.

mod support;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use pinch_agent::{Connection, ConnectionState, PermissionsManifest};
use pinch_crypto::Identity;
use support::{next_test_port, spawn_agent, start_test_relay, wait_until};

#[tokio::test]
async fn queued_message_is_flushed_on_first_connect() {
    let port = next_test_port();
    let relay = start_test_relay(port).await;

    // Bob's identity (and therefore his deterministic address) exists
    // before he ever connects to the relay.
    let bob_dir = tempfile::tempdir().unwrap();
    let bob_keypair_path = bob_dir.path().join("keypair.json");
    let bob_identity = Identity::generate();
    bob_identity.save(&bob_keypair_path).unwrap();
    let bob_address = bob_identity.address("localhost").to_string_repr();
    let bob_pubkey_b64 = base64::engine::general_purpose::STANDARD.encode(bob_identity.public_key_bytes());

    let alice = spawn_agent(&relay).await;

    // Alice already knows bob's address and public key (as if a
    // connection request had already been approved) so she can send
    // straight away without bob being online.
    let now = chrono::Utc::now();
    alice
        .connections
        .upsert(Connection {
            peer_address: bob_address.clone(),
            peer_pubkey: bob_pubkey_b64,
            state: ConnectionState::Active,
            nickname: None,
            autonomy: pinch_agent::AutonomyLevel::FullManual,
            auto_respond_policy: None,
            permissions: PermissionsManifest::deny_all(),
            muted: false,
            passthrough: false,
            circuit_breaker_tripped: false,
            short_message: None,
            created_at: now,
            last_activity_at: now,
            expires_at: None,
        })
        .unwrap();

    let message_id = alice
        .message_engine
        .send_message(&bob_address, "waiting for you to come online", None, None, None, None)
        .await
        .unwrap();

    // Give the relay time to enqueue it durably before bob connects.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let bob_config = pinch_agent::AgentConfig {
        relay_url: relay.url.clone(),
        keypair_path: bob_keypair_path,
        data_dir: bob_dir.path().to_path_buf(),
    };
    let bob = pinch_agent::PinchAgent::bootstrap(bob_config, Arc::new(pinch_agent::NullPolicyEvaluator))
        .await
        .unwrap();
    assert_eq!(bob.address(), bob_address);

    let flushed = wait_until(
        || !bob.messages.list_for_connection(alice.address()).unwrap().is_empty(),
        Duration::from_secs(2),
    )
    .await;
    assert!(flushed, "queued message was never flushed to bob");

    let record = bob
        .messages
        .list_for_connection(alice.address())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert!(record.body.contains("waiting for you to come online"));

    let drained = bob.message_engine.wait_for_flush(Duration::from_secs(1)).await;
    assert!(drained, "flush tracker never resolved after the queue drained");

    // The confirmation bob sent back should eventually mark alice's
    // record delivered too.
    let confirmed = wait_until(
        || {
            alice
                .messages
                .get(&message_id)
                .ok()
                .flatten()
                .map(|r| r.state == "delivered")
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(confirmed);
}
