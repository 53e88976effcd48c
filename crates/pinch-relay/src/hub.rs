//! The relay hub: routing table, block enforcement, queueing and rate
//! limiting. One [`RelayHub`] is shared (via `Arc`) across every
//! connection task, mirroring `WebSocketState`'s role in the upstream
//! backend but generalized to Pinch's routing rules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pinch_envelope::{decode_envelope, Envelope, Payload, RELAY_READ_LIMIT_BYTES};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::config::{RelayConfig, FLUSH_BATCH_SIZE};
use crate::error::Result;
use crate::ratelimit::SenderRateLimiters;
use crate::store::Store;

/// A registered, authenticated client connection.
pub struct ConnectionHandle {
    pub sender: mpsc::Sender<Vec<u8>>,
    /// Set while this recipient's queue is being flushed on reconnect;
    /// real-time sends are redirected to the queue while true, to
    /// preserve chronological order.
    pub flushing: AtomicBool,
}

pub struct RelayHub {
    pub config: RelayConfig,
    pub store: Arc<Store>,
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    limiters: SenderRateLimiters,
}

/// Outcome of routing a single inbound envelope, used by the
/// connection task to decide what (if anything) to send back to the
/// sender.
pub enum RouteOutcome {
    Delivered,
    Queued,
    QueueFull { recipient: String },
    RateLimited { retry_after_ms: u64 },
    Dropped,
}

impl RelayHub {
    pub fn new(config: RelayConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            connections: RwLock::new(HashMap::new()),
            limiters: SenderRateLimiters::new(),
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_registered(&self, address: &str) -> bool {
        self.connections.read().await.contains_key(address)
    }

    /// Register a freshly authenticated connection. Returns `false`
    /// (refusing registration) if the address is already connected.
    pub async fn register(&self, address: &str, sender: mpsc::Sender<Vec<u8>>) -> bool {
        let mut connections = self.connections.write().await;
        if connections.contains_key(address) {
            return false;
        }
        connections.insert(
            address.to_string(),
            Arc::new(ConnectionHandle {
                sender,
                flushing: AtomicBool::new(false),
            }),
        );
        true
    }

    pub async fn deregister(&self, address: &str) {
        self.connections.write().await.remove(address);
    }

    pub async fn handle_of(&self, address: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(address).cloned()
    }

    /// Route one post-auth inbound envelope from `sender_address`.
    /// Implements the ordered checks: rate limit, size, then dispatch
    /// by type.
    pub async fn route(&self, sender_address: &str, raw_envelope: &[u8]) -> Result<RouteOutcome> {
        if !self.limiters.check(sender_address).await {
            return Ok(RouteOutcome::RateLimited {
                retry_after_ms: 1000,
            });
        }

        if raw_envelope.len() > RELAY_READ_LIMIT_BYTES {
            debug!(sender = sender_address, "dropping oversize envelope");
            return Ok(RouteOutcome::Dropped);
        }

        let envelope = match decode_envelope(raw_envelope) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "dropping malformed envelope");
                return Ok(RouteOutcome::Dropped);
            }
        };

        match &envelope.payload {
            Payload::BlockNotification(notification) => {
                self.store.block(sender_address, &notification.blocked)?;
                Ok(RouteOutcome::Dropped)
            }
            Payload::UnblockNotification(notification) => {
                self.store.unblock(sender_address, &notification.unblocked)?;
                Ok(RouteOutcome::Dropped)
            }
            _ => self.route_to_recipient(sender_address, &envelope, raw_envelope).await,
        }
    }

    async fn route_to_recipient(
        &self,
        sender_address: &str,
        envelope: &Envelope,
        raw_envelope: &[u8],
    ) -> Result<RouteOutcome> {
        let Some(recipient) = envelope.to_address.clone() else {
            return Ok(RouteOutcome::Dropped);
        };

        if self.store.is_blocked(&recipient, sender_address)? {
            return Ok(RouteOutcome::Dropped);
        }

        let handle = self.handle_of(&recipient).await;
        let should_queue = match &handle {
            None => true,
            Some(h) => h.flushing.load(Ordering::SeqCst),
        };

        if !should_queue {
            if let Some(handle) = handle {
                match handle.sender.try_send(raw_envelope.to_vec()) {
                    Ok(()) => return Ok(RouteOutcome::Delivered),
                    Err(_) => {
                        warn!(recipient = %recipient, "send buffer full, dropping envelope");
                        return Ok(RouteOutcome::Dropped);
                    }
                }
            }
        }

        match self
            .store
            .enqueue(&recipient, sender_address, raw_envelope, self.config.queue_max)?
        {
            Some(_) => Ok(RouteOutcome::Queued),
            None => Ok(RouteOutcome::QueueFull { recipient }),
        }
    }

    /// Flush a recipient's durable queue in chronological order,
    /// sending `QueueStatus` first. Sets the `flushing` flag for the
    /// duration so concurrently routed envelopes are redirected to the
    /// queue rather than interleaved ahead of older ones.
    ///
    /// TTL-expired entries are skipped and deleted rather than
    /// delivered (spec.md's flush-path TTL check, mirroring the
    /// background sweep's threshold); the surviving entries are sent in
    /// batches of [`FLUSH_BATCH_SIZE`].
    pub async fn flush_queue(&self, address: &str, handle: &Arc<ConnectionHandle>) -> Result<()> {
        handle.flushing.store(true, Ordering::SeqCst);

        let now_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let ttl_nanos = self.config.queue_ttl.as_nanos() as u64;

        let mut deliverable = Vec::new();
        for item in self.store.iter_queue(address)? {
            if now_nanos.saturating_sub(item.enqueued_at_nanos) > ttl_nanos {
                debug!(recipient = address, "skipping TTL-expired queue entry during flush");
                self.store.remove_from_queue(address, &item.sort_key)?;
                continue;
            }
            deliverable.push(item);
        }

        let status = Envelope::new(
            pinch_envelope::PROTOCOL_VERSION,
            self.config.host.clone(),
            Some(address.to_string()),
            None,
            None,
            Payload::QueueStatus(pinch_envelope::QueueStatus {
                pending_count: deliverable.len() as u64,
            }),
        );
        if let Ok(bytes) = pinch_envelope::encode_envelope(&status, usize::MAX) {
            let _ = handle.sender.send(bytes).await;
        }

        for batch in deliverable.chunks(FLUSH_BATCH_SIZE) {
            for item in batch {
                if handle.sender.send(item.raw_envelope.clone()).await.is_err() {
                    handle.flushing.store(false, Ordering::SeqCst);
                    return Ok(());
                }
                self.store.remove_from_queue(address, &item.sort_key)?;
            }
        }

        handle.flushing.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Background sweep task: periodically drop expired/corrupt queue
    /// entries. Runs for the lifetime of the relay process.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(crate::config::SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match self.store.sweep_expired(self.config.queue_ttl) {
                Ok(removed) if removed > 0 => {
                    debug!(removed, "swept expired queue entries");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "queue sweep failed"),
            }
        }
    }
}
