//! Blocking a peer stops the relay from delivering any further
//! message from them, independent of local connection state.

mod support;

use std::time::Duration;

use pinch_agent::ConnectionState;
use support::{next_test_port, spawn_agent, start_test_relay, wait_until};

async fn connect_mutually(alice: &pinch_agent::PinchAgent, bob: &pinch_agent::PinchAgent) {
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
}

#[tokio::test]
async fn blocked_peers_messages_never_arrive() {
    let port = next_test_port();
    let relay = start_test_relay(port).await;

    let alice = spawn_agent(&relay).await;
    let bob = spawn_agent(&relay).await;
    connect_mutually(&alice, &bob).await;

    bob.connection_manager.block_connection(alice.address()).await.unwrap();
    let blocked = wait_until(
        || {
            bob.connections
                .get(alice.address())
                .ok()
                .flatten()
                .map(|c| c.state == ConnectionState::Blocked)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(blocked);

    // Give the relay a moment to apply the block before alice sends.
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice
        .message_engine
        .send_message(bob.address(), "are you there?", None, None, None, None)
        .await
        .unwrap();

    // The relay silently drops it; bob's message store never sees it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let bob_messages = bob.messages.list_for_connection(alice.address()).unwrap();
    assert!(bob_messages.is_empty(), "blocked sender's message was delivered");
}

#[tokio::test]
async fn unblocking_restores_delivery() {
    let port = next_test_port();
    let relay = start_test_relay(port).await;

    let alice = spawn_agent(&relay).await;
    let bob = spawn_agent(&relay).await;
    connect_mutually(&alice, &bob).await;

    bob.connection_manager.block_connection(alice.address()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    bob.connection_manager.unblock_connection(alice.address()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    alice
        .message_engine
        .send_message(bob.address(), "hello again", None, None, None, None)
        .await
        .unwrap();

    let delivered = wait_until(
        || !bob.messages.list_for_connection(alice.address()).unwrap().is_empty(),
        Duration::from_secs(2),
    )
    .await;
    assert!(delivered, "message never arrived after unblocking");
}
