//! The hash-chained audit log stays verifiable after a real sequence
//! of agent activity, and tampering with a stored row is detected.

mod support;

use std::time::Duration;

use pinch_agent::ConnectionState;
use support::{next_test_port, spawn_agent, start_test_relay, wait_until};

#[tokio::test]
async fn activity_from_a_live_session_produces_a_verifiable_chain() {
    let port = next_test_port();
    let relay = start_test_relay(port).await;

    let alice = spawn_agent(&relay).await;
    let bob = spawn_agent(&relay).await;

    alice.connection_manager.send_request(bob.address(), "hi").await.unwrap();
    wait_until(
        || {
            bob.connections
                .get(alice.address())
                .ok()
                .flatten()
                .map(|c| c.state == ConnectionState::PendingInbound)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;
    bob.connection_manager.approve_request(alice.address()).await.unwrap();
    wait_until(
        || {
            alice
                .connections
                .get(bob.address())
                .ok()
                .flatten()
                .map(|c| c.state == ConnectionState::Active)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    let mut bob_conn = bob.connections.get(alice.address()).unwrap().unwrap();
    bob_conn.muted = true;
    bob.connections.upsert(bob_conn).unwrap();

    for i in 0..3 {
        alice
            .message_engine
            .send_message(bob.address(), &format!("message {i}"), None, None, None, None)
            .await
            .unwrap();
    }

    wait_until(
        || bob.audit.for_connection(alice.address()).map(|e| e.len() >= 3).unwrap_or(false),
        Duration::from_secs(2),
    )
    .await;

    let chain = bob.audit.all().unwrap();
    assert!(!chain.is_empty());
    pinch_agent::verify_chain(&chain).expect("freshly produced chain should verify");

    // Tampering with a stored row's recoverable fields (outside the
    // database, simulating an on-disk edit) must be caught.
    let mut tampered = chain.clone();
    let mid = tampered.len() / 2;
    tampered[mid].connection_address = "pinch:attacker@relay".to_string();
    let err = pinch_agent::verify_chain(&tampered).unwrap_err();
    match err {
        pinch_agent::AgentError::AuditChainBroken { index, .. } => assert_eq!(index, mid),
        other => panic!("expected AuditChainBroken, got {other:?}"),
    }
}
