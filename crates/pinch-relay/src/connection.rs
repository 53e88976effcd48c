//! Per-connection task: auth handshake, flush-on-reconnect, then the
//! steady-state read/write loop with heartbeats. Mirrors the upstream
//! backend's split-socket + `mpsc` forwarding shape in
//! `WebSocketTransport::handle_socket`, generalized to Pinch's
//! multi-stage handshake and routing rules.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use futures_util::{SinkExt, StreamExt};
use pinch_crypto::PinchAddress;
use pinch_envelope::{
    build_auth_message, decode_envelope, encode_envelope, AuthChallenge, AuthResult, Envelope,
    Payload, QueueFull, RateLimited, RELAY_READ_LIMIT_BYTES,
};
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{
    AUTH_TIMEOUT, CLOSE_CODE_AUTH_FAILURE, HEARTBEAT_GRACE_MAX, HEARTBEAT_INTERVAL_MAX,
};
use crate::hub::{RelayHub, RouteOutcome};

pub async fn handle_socket(hub: Arc<RelayHub>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let address = match authenticate(&hub, &mut sender, &mut receiver).await {
        Some(address) => address,
        None => return,
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    if !hub.register(&address, tx).await {
        let _ = close_with_error(&mut sender, "address already connected").await;
        return;
    }
    info!(address = %address, "client registered");

    if let Some(handle) = hub.handle_of(&address).await {
        if let Err(e) = hub.flush_queue(&address, &handle).await {
            warn!(error = %e, "queue flush failed");
        }
    }

    let last_pong = Arc::new(tokio::sync::Mutex::new(tokio::time::Instant::now()));

    let write_address = address.clone();
    let write_last_pong = last_pong.clone();
    let write_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL_MAX);
        heartbeat.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(bytes) => {
                            if sender.send(Message::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    let stale = write_last_pong.lock().await.elapsed()
                        > HEARTBEAT_INTERVAL_MAX + HEARTBEAT_GRACE_MAX;
                    if stale {
                        debug!(address = %write_address, "no pong within grace period, closing");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(address = %write_address, "write task ending");
    });

    let read_hub = hub.clone();
    let read_address = address.clone();
    let read_last_pong = last_pong.clone();
    let read_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Binary(bytes)) => {
                    if bytes.len() > RELAY_READ_LIMIT_BYTES {
                        continue;
                    }
                    if let Err(e) = route_one(&read_hub, &read_address, &bytes).await {
                        warn!(error = %e, "routing failure");
                    }
                }
                Ok(Message::Pong(_)) => {
                    *read_last_pong.lock().await = tokio::time::Instant::now();
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    tokio::select! {
        _ = read_task => {}
        _ = write_task => {}
    }

    hub.deregister(&address).await;
    info!(address = %address, "client deregistered");
}

async fn route_one(hub: &Arc<RelayHub>, address: &str, bytes: &[u8]) -> crate::error::Result<()> {
    match hub.route(address, bytes).await? {
        RouteOutcome::Delivered | RouteOutcome::Queued | RouteOutcome::Dropped => Ok(()),
        RouteOutcome::QueueFull { recipient } => {
            if let Some(handle) = hub.handle_of(address).await {
                let envelope = Envelope::new(
                    pinch_envelope::PROTOCOL_VERSION,
                    hub.config.host.clone(),
                    Some(address.to_string()),
                    None,
                    None,
                    Payload::QueueFull(QueueFull {
                        recipient_address: recipient,
                        reason: "recipient queue at capacity".to_string(),
                    }),
                );
                if let Ok(bytes) = encode_envelope(&envelope, usize::MAX) {
                    let _ = handle.sender.send(bytes).await;
                }
            }
            Ok(())
        }
        RouteOutcome::RateLimited { retry_after_ms } => {
            if let Some(handle) = hub.handle_of(address).await {
                let envelope = Envelope::new(
                    pinch_envelope::PROTOCOL_VERSION,
                    hub.config.host.clone(),
                    Some(address.to_string()),
                    None,
                    None,
                    Payload::RateLimited(RateLimited {
                        retry_after_ms,
                        reason: "sender rate limit exceeded".to_string(),
                    }),
                );
                if let Ok(bytes) = encode_envelope(&envelope, usize::MAX) {
                    let _ = handle.sender.send(bytes).await;
                }
            }
            Ok(())
        }
    }
}

/// Run the three-message auth handshake. Returns the authenticated,
/// derived address on success; on any failure sends `AuthResult` and
/// closes the socket, returning `None`.
async fn authenticate(
    hub: &Arc<RelayHub>,
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<String> {
    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let now_ms = now_millis();
    let challenge = Envelope::new(
        pinch_envelope::PROTOCOL_VERSION,
        hub.config.host.clone(),
        None,
        None,
        Some(now_ms),
        Payload::AuthChallenge(AuthChallenge {
            version: pinch_envelope::PROTOCOL_VERSION,
            nonce,
            issued_at_ms: now_ms,
            expires_at_ms: now_ms + AUTH_TIMEOUT.as_millis() as u64,
            relay_host: hub.config.host.clone(),
        }),
    );

    let bytes = encode_envelope(&challenge, usize::MAX).ok()?;
    if sender.send(Message::Binary(bytes)).await.is_err() {
        return None;
    }

    let response = match timeout(AUTH_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Binary(bytes)))) => bytes,
        _ => {
            let _ = close_with_error(sender, "auth response timed out").await;
            return None;
        }
    };

    let envelope = match decode_envelope(&response) {
        Ok(envelope) => envelope,
        Err(_) => {
            let _ = close_with_error(sender, "malformed auth response").await;
            return None;
        }
    };

    let Payload::AuthResponse(auth_response) = envelope.payload else {
        let _ = close_with_error(sender, "expected AuthResponse").await;
        return None;
    };

    if auth_response.nonce_echo != nonce {
        let _ = close_with_error(sender, "nonce mismatch").await;
        return None;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(&auth_response.pubkey) else {
        let _ = close_with_error(sender, "malformed public key").await;
        return None;
    };
    let signature = Signature::from_bytes(&auth_response.signature);

    let message = build_auth_message(&hub.config.host, &nonce);
    if verifying_key.verify(&message, &signature).is_err() {
        let _ = close_with_error(sender, "signature verification failed").await;
        return None;
    }

    let address = PinchAddress::derive(&auth_response.pubkey, &hub.config.host).to_string_repr();

    if hub.is_registered(&address).await {
        let _ = close_with_error(sender, "address already connected").await;
        return None;
    }

    let result = Envelope::new(
        pinch_envelope::PROTOCOL_VERSION,
        hub.config.host.clone(),
        Some(address.clone()),
        None,
        Some(now_millis()),
        Payload::AuthResult(AuthResult {
            success: true,
            error_message: None,
            assigned_address: Some(address.clone()),
        }),
    );
    let bytes = encode_envelope(&result, usize::MAX).ok()?;
    if sender.send(Message::Binary(bytes)).await.is_err() {
        return None;
    }

    Some(address)
}

async fn close_with_error(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &str,
) -> Result<(), axum::Error> {
    let result = Envelope::new(
        pinch_envelope::PROTOCOL_VERSION,
        "relay",
        None,
        None,
        Some(now_millis()),
        Payload::AuthResult(AuthResult {
            success: false,
            error_message: Some(message.to_string()),
            assigned_address: None,
        }),
    );
    if let Ok(bytes) = encode_envelope(&result, usize::MAX) {
        let _ = sender.send(Message::Binary(bytes)).await;
    }
    sender
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_CODE_AUTH_FAILURE,
            reason: message.to_string().into(),
        })))
        .await
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

