//! Bootstrap: wires identity, transport, stores, the connection
//! manager, the message engine, and the enforcement pipeline into one
//! handle. Per the design notes, nothing here holds the full transport
//! struct long-term — only the cheap [`TransportHandle`], so the
//! subscriber closure registered on the socket never closes a cycle
//! back through [`PinchAgent`].

use std::sync::Arc;

use tracing::{debug, error, warn};

use pinch_crypto::Identity;
use pinch_envelope::{ConnectionRequest, Payload};

use crate::config::{AgentConfig, CircuitBreakerThresholds};
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::message::MessageEngine;
use crate::pipeline::EnforcementPipeline;
use crate::policy::PolicyEvaluator;
use crate::store::audit_store::AuditStore;
use crate::store::connection_store::ConnectionStore;
use crate::store::message_store::MessageStore;
use crate::transport::{PinchTransport, TransportHandle};

/// A single agent's wired-up runtime: everything a caller needs to
/// request connections, send and receive messages, and inspect the
/// audit log, behind one handle.
pub struct PinchAgent {
    pub identity: Arc<Identity>,
    pub address: String,
    pub transport: TransportHandle,
    pub connections: Arc<ConnectionStore>,
    pub messages: Arc<MessageStore>,
    pub audit: Arc<AuditStore>,
    pub connection_manager: Arc<ConnectionManager>,
    pub message_engine: Arc<MessageEngine>,
    pub pipeline: Arc<EnforcementPipeline>,
}

impl PinchAgent {
    /// Load or create the identity, connect and authenticate to the
    /// relay, open the local stores, and register the dispatch handler
    /// that routes every post-auth envelope to its owning component.
    pub async fn bootstrap(config: AgentConfig, evaluator: Arc<dyn PolicyEvaluator>) -> Result<Arc<Self>> {
        Self::bootstrap_with_thresholds(config, evaluator, CircuitBreakerThresholds::default()).await
    }

    pub async fn bootstrap_with_thresholds(
        config: AgentConfig,
        evaluator: Arc<dyn PolicyEvaluator>,
        thresholds: CircuitBreakerThresholds,
    ) -> Result<Arc<Self>> {
        let identity = Arc::new(Identity::load_or_create(&config.keypair_path)?);

        let transport = Arc::new(PinchTransport::new(config.relay_url.clone(), identity.clone())?);
        transport.connect_with_reconnect().await?;
        let handle = transport.handle();
        let address = handle
            .assigned_address()
            .ok_or_else(|| crate::error::AgentError::AuthFailed("no assigned address after handshake".to_string()))?;

        let connections = Arc::new(ConnectionStore::open(&config.connection_store_path())?);
        let messages = Arc::new(MessageStore::open(config.message_db_path().to_string_lossy().as_ref())?);
        let audit = Arc::new(AuditStore::open(config.audit_db_path().to_string_lossy().as_ref())?);

        let connection_manager = Arc::new(ConnectionManager::new(connections.clone(), handle.clone(), address.clone()));
        let message_engine = Arc::new(MessageEngine::new(
            identity.clone(),
            handle.clone(),
            connections.clone(),
            messages.clone(),
            address.clone(),
        ));
        let pipeline = Arc::new(EnforcementPipeline::new(
            connections.clone(),
            audit.clone(),
            messages.clone(),
            evaluator,
            thresholds,
        ));

        register_dispatch(&transport, connection_manager.clone(), message_engine.clone(), pipeline.clone()).await;

        Ok(Arc::new(Self {
            identity,
            address,
            transport: handle,
            connections,
            messages,
            audit,
            connection_manager,
            message_engine,
            pipeline,
        }))
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

async fn register_dispatch(
    transport: &Arc<PinchTransport>,
    connection_manager: Arc<ConnectionManager>,
    message_engine: Arc<MessageEngine>,
    pipeline: Arc<EnforcementPipeline>,
) {
    let handler: crate::transport::EnvelopeHandler = Arc::new(move |envelope| {
        let connection_manager = connection_manager.clone();
        let message_engine = message_engine.clone();
        let pipeline = pipeline.clone();

        tokio::spawn(async move {
            if let Err(e) = dispatch_one(envelope, &connection_manager, &message_engine, &pipeline).await {
                error!(error = %e, "error dispatching inbound envelope");
            }
        });
    });
    transport.subscribe(handler).await;
}

async fn dispatch_one(
    envelope: pinch_envelope::Envelope,
    connection_manager: &ConnectionManager,
    message_engine: &MessageEngine,
    pipeline: &EnforcementPipeline,
) -> Result<()> {
    match &envelope.payload {
        Payload::Encrypted(_) => {
            if let Some(incoming) = message_engine.handle_incoming(&envelope).await? {
                let outcome = pipeline.process(&incoming).await?;
                debug!(peer = %incoming.from_address, ?outcome, "processed inbound message");
            }
        }
        Payload::DeliveryConfirm(confirm) => {
            message_engine.handle_delivery_confirmation(&envelope.from_address, confirm)?;
        }
        Payload::ConnectionRequest(request) => {
            let request: ConnectionRequest = request.clone();
            connection_manager.handle_incoming_request(&request, None)?;
        }
        Payload::ConnectionResponse(response) => {
            connection_manager.handle_incoming_response(response)?;
        }
        Payload::ConnectionRevoke(revoke) => {
            connection_manager.handle_incoming_revoke(revoke)?;
        }
        Payload::BlockNotification(notice) => {
            debug!(blocker = %notice.blocker, blocked = %notice.blocked, "received block notification");
        }
        Payload::UnblockNotification(notice) => {
            debug!(unblocker = %notice.unblocker, unblocked = %notice.unblocked, "received unblock notification");
        }
        Payload::QueueStatus(status) => {
            message_engine.begin_flush(status);
        }
        Payload::QueueFull(full) => {
            warn!(recipient = %full.recipient_address, reason = %full.reason, "queue full notice received");
        }
        Payload::RateLimited(limited) => {
            warn!(retry_after_ms = limited.retry_after_ms, reason = %limited.reason, "rate limited by relay");
        }
        Payload::Heartbeat | Payload::AuthChallenge(_) | Payload::AuthResponse(_) | Payload::AuthResult(_) => {}
    }
    Ok(())
}
