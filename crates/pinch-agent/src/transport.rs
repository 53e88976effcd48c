//! The agent's relay client: the auth handshake, the reconnect
//! supervisor, and envelope dispatch (§4.3).
//!
//! Connection managers and the message engine never hold the socket
//! directly — they hold a cheap [`TransportHandle`] (send + subscribe),
//! breaking the cycle the design notes call out between the transport
//! and its consumers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use pinch_crypto::Identity;
use pinch_envelope::{
    build_auth_message, decode_envelope, encode_envelope, AuthResponse, Envelope, Payload,
    CLIENT_SEND_LIMIT_BYTES,
};

use crate::config::{RECONNECT_INITIAL_BACKOFF, RECONNECT_JITTER, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_BACKOFF};
use crate::error::{AgentError, Result};

pub type EnvelopeHandler = Arc<dyn Fn(Envelope) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// The operations a connection manager or the message engine needs
/// from the transport. Abstracted behind a trait so tests can swap in
/// a fake without a live socket.
#[async_trait]
pub trait TransportOps: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<()>;
    fn local_public_key_b64(&self) -> String;
    fn assigned_address(&self) -> Option<String>;

    /// Number of envelopes sent so far. Only meaningful for test
    /// doubles; the live transport reports 0.
    fn sent_count(&self) -> usize {
        0
    }
}

/// A cheap, cloneable handle over `Arc<dyn TransportOps>`.
#[derive(Clone)]
pub struct TransportHandle {
    inner: Arc<dyn TransportOps>,
}

impl TransportHandle {
    pub fn new(inner: Arc<dyn TransportOps>) -> Self {
        Self { inner }
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.inner.send(envelope).await
    }

    pub fn local_public_key_b64(&self) -> String {
        self.inner.local_public_key_b64()
    }

    pub fn assigned_address(&self) -> Option<String> {
        self.inner.assigned_address()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.sent_count()
    }
}

struct TransportState {
    send_tx: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
    assigned_address: RwLock<Option<String>>,
    subscribers: RwLock<Vec<EnvelopeHandler>>,
    disconnect_handlers: RwLock<Vec<DisconnectHandler>>,
    reconnect_enabled: AtomicBool,
    generation: AtomicU32,
}

/// The live relay client: connects, authenticates, maintains the
/// connection with backoff reconnect, and fans out decoded envelopes
/// to every registered handler.
pub struct PinchTransport {
    relay_url: String,
    configured_host: String,
    identity: Arc<Identity>,
    state: Arc<TransportState>,
}

impl PinchTransport {
    pub fn new(relay_url: impl Into<String>, identity: Arc<Identity>) -> Result<Self> {
        let relay_url = relay_url.into();
        let parsed = url::Url::parse(&relay_url)
            .map_err(|e| AgentError::Transport(format!("invalid relay URL: {e}")))?;
        let configured_host = parsed
            .host_str()
            .ok_or_else(|| AgentError::Transport("relay URL has no host".to_string()))?
            .to_string();

        Ok(Self {
            relay_url,
            configured_host,
            identity,
            state: Arc::new(TransportState {
                send_tx: RwLock::new(None),
                assigned_address: RwLock::new(None),
                subscribers: RwLock::new(Vec::new()),
                disconnect_handlers: RwLock::new(Vec::new()),
                reconnect_enabled: AtomicBool::new(false),
                generation: AtomicU32::new(0),
            }),
        })
    }

    pub fn handle(self: &Arc<Self>) -> TransportHandle {
        TransportHandle::new(self.clone())
    }

    /// Register a handler invoked for every decoded post-auth inbound
    /// envelope (multi-subscriber dispatch).
    pub async fn subscribe(&self, handler: EnvelopeHandler) {
        self.state.subscribers.write().await.push(handler);
    }

    /// Register a callback fired once reconnect attempts are
    /// exhausted.
    pub async fn on_disconnect(&self, handler: DisconnectHandler) {
        self.state.disconnect_handlers.write().await.push(handler);
    }

    /// Connect and complete the three-message auth handshake. Rejects
    /// on any pre-`done` failure and leaves reconnect disabled; callers
    /// that want automatic reconnect call [`PinchTransport::connect_with_reconnect`]
    /// instead.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.connect_once().await
    }

    /// Like [`PinchTransport::connect`], but on unexpected disconnect
    /// (not an explicit [`PinchTransport::disconnect`]) retries with
    /// exponential backoff up to `RECONNECT_MAX_ATTEMPTS` times before
    /// firing the disconnect handlers.
    pub async fn connect_with_reconnect(self: &Arc<Self>) -> Result<()> {
        self.state.reconnect_enabled.store(true, Ordering::SeqCst);
        self.connect_once().await?;

        let this = self.clone();
        tokio::spawn(async move {
            this.reconnect_supervisor().await;
        });
        Ok(())
    }

    /// Disables reconnect and closes the socket.
    pub async fn disconnect(&self) {
        self.state.reconnect_enabled.store(false, Ordering::SeqCst);
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        *self.state.send_tx.write().await = None;
    }

    async fn reconnect_supervisor(self: Arc<Self>) {
        let mut backoff = RECONNECT_INITIAL_BACKOFF;
        let mut attempts = 0u32;

        loop {
            // Wait until the current connection drops (send_tx cleared
            // by the read/write tasks on close) while reconnect stays
            // enabled.
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if !self.state.reconnect_enabled.load(Ordering::SeqCst) {
                    return;
                }
                if self.state.send_tx.read().await.is_none() {
                    break;
                }
            }

            if attempts >= RECONNECT_MAX_ATTEMPTS {
                warn!("reconnect attempts exhausted, giving up");
                for handler in self.state.disconnect_handlers.read().await.iter() {
                    handler();
                }
                return;
            }

            let jitter_ms: u64 = rand::thread_rng().gen_range(0..RECONNECT_JITTER.as_millis() as u64 + 1);
            tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;

            match self.connect_once().await {
                Ok(()) => {
                    info!("reconnected to relay");
                    attempts = 0;
                    backoff = RECONNECT_INITIAL_BACKOFF;
                }
                Err(e) => {
                    attempts += 1;
                    backoff = std::cmp::min(backoff * 2, RECONNECT_MAX_BACKOFF);
                    warn!(error = %e, attempts, "reconnect attempt failed");
                }
            }
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.relay_url)
            .await
            .map_err(|e| AgentError::Transport(format!("connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        // awaiting_challenge
        let challenge_bytes = match read.next().await {
            Some(Ok(WsMessage::Binary(bytes))) => bytes,
            _ => return Err(AgentError::AuthFailed("no challenge received".to_string())),
        };
        let challenge_envelope = decode_envelope(&challenge_bytes)?;
        let Payload::AuthChallenge(challenge) = challenge_envelope.payload else {
            return Err(AgentError::AuthFailed("expected AuthChallenge".to_string()));
        };

        // Validate the relay hostname against our configured host
        // before signing, preventing cross-relay replay.
        if challenge.relay_host != self.configured_host {
            return Err(AgentError::AuthFailed(format!(
                "relay host mismatch: expected {}, got {}",
                self.configured_host, challenge.relay_host
            )));
        }

        // awaiting_result
        let message = build_auth_message(&challenge.relay_host, &challenge.nonce);
        let signature = self.identity.sign(&message);

        let response = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            "unauthenticated",
            None,
            None,
            None,
            Payload::AuthResponse(AuthResponse {
                version: pinch_envelope::PROTOCOL_VERSION,
                pubkey: self.identity.public_key_bytes(),
                signature: signature.to_bytes(),
                nonce_echo: challenge.nonce,
            }),
        );
        let bytes = encode_envelope(&response, usize::MAX)?;
        write
            .send(WsMessage::Binary(bytes))
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let result_bytes = match read.next().await {
            Some(Ok(WsMessage::Binary(bytes))) => bytes,
            _ => return Err(AgentError::AuthFailed("no auth result received".to_string())),
        };
        let result_envelope = decode_envelope(&result_bytes)?;
        let Payload::AuthResult(result) = result_envelope.payload else {
            return Err(AgentError::AuthFailed("expected AuthResult".to_string()));
        };
        if !result.success {
            return Err(AgentError::AuthFailed(
                result.error_message.unwrap_or_else(|| "auth rejected".to_string()),
            ));
        }
        let assigned_address = result
            .assigned_address
            .ok_or_else(|| AgentError::AuthFailed("missing assigned address".to_string()))?;

        // done
        *self.state.assigned_address.write().await = Some(assigned_address.clone());
        info!(address = %assigned_address, "auth handshake complete");

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        *self.state.send_tx.write().await = Some(tx);
        let my_generation = self.state.generation.load(Ordering::SeqCst);

        let write_state = self.state.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write.send(WsMessage::Binary(bytes)).await.is_err() {
                    break;
                }
            }
            if write_state.generation.load(Ordering::SeqCst) == my_generation {
                *write_state.send_tx.write().await = None;
            }
        });

        let read_state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Binary(bytes)) => {
                        match decode_envelope(&bytes) {
                            Ok(envelope) => {
                                let handlers = read_state.subscribers.read().await;
                                for handler in handlers.iter() {
                                    handler(envelope.clone());
                                }
                            }
                            Err(e) => debug!(error = %e, "dropping malformed envelope"),
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            if read_state.generation.load(Ordering::SeqCst) == my_generation {
                *read_state.send_tx.write().await = None;
            }
            debug!("read task ending");
        });

        Ok(())
    }
}

#[async_trait]
impl TransportOps for PinchTransport {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let bytes = encode_envelope(envelope, CLIENT_SEND_LIMIT_BYTES)
            .map_err(|_| AgentError::EnvelopeTooLarge)?;
        let tx = self.state.send_tx.read().await;
        let tx = tx.as_ref().ok_or(AgentError::NotConnected)?;
        tx.send(bytes)
            .await
            .map_err(|_| AgentError::Transport("send channel closed".to_string()))
    }

    fn local_public_key_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.identity.public_key_bytes())
    }

    fn assigned_address(&self) -> Option<String> {
        // Best-effort synchronous read; callers needing the freshest
        // value after a just-completed handshake should prefer the
        // address returned by `connect`.
        self.state
            .assigned_address
            .try_read()
            .ok()
            .and_then(|g| g.clone())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    /// A fake transport that records sent envelopes instead of putting
    /// bytes on a socket, for unit-testing managers in isolation.
    pub struct FakeTransport {
        pub sent: Mutex<Vec<Envelope>>,
        pub count: AtomicUsize,
    }

    impl FakeTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransportOps for FakeTransport {
        async fn send(&self, envelope: &Envelope) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().await.push(envelope.clone());
            Ok(())
        }

        fn local_public_key_b64(&self) -> String {
            "fake-pubkey".to_string()
        }

        fn assigned_address(&self) -> Option<String> {
            Some("pinch:me@relay".to_string())
        }

        fn sent_count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    pub fn inert_transport_handle() -> TransportHandle {
        TransportHandle::new(FakeTransport::new())
    }
}
