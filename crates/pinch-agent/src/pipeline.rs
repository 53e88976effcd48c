//! The inbound enforcement pipeline (§4.7). A fixed step order: mute,
//! passthrough, permissions, circuit breaker, autonomy routing,
//! auto-respond policy evaluation. Every step that matters for the
//! activity feed appends to the audit log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::audit::{EventType, NewEvent};
use crate::circuit_breaker::{BreakerTrigger, CircuitBreaker};
use crate::config::CircuitBreakerThresholds;
use crate::connection::{AutonomyLevel, ConnectionState};
use crate::error::Result;
use crate::message::IncomingMessage;
use crate::permissions::{PermissionVerdict, PermissionsEnforcer};
use crate::policy::{PolicyDecision, PolicyEvaluator, PolicyRequest};
use crate::store::audit_store::AuditStore;
use crate::store::connection_store::ConnectionStore;
use crate::store::message_store::MessageStore;

/// What the pipeline decided to do with one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Connection is muted; the message was recorded but suppressed
    /// from the live view.
    Muted,
    /// Human intervention (passthrough) is active for this connection.
    Passthrough,
    /// Permissions denied the message outright.
    Denied { reason: String },
    /// Permissions could not decide; a human must review.
    Escalated { reason: String },
    /// A circuit breaker tripped; autonomy was downgraded to
    /// `FullManual`.
    CircuitBreakerTripped { trigger: &'static str },
    /// Delivered to the connection's current autonomy tier for manual
    /// or notified handling.
    Routed { autonomy: AutonomyLevel },
    /// Evaluated against the connection's auto-respond policy.
    AutoRespondEvaluated { decision: PolicyDecision },
}

/// Orchestrates §4.7's enforcement order for every inbound message.
pub struct EnforcementPipeline {
    connections: Arc<ConnectionStore>,
    audit: Arc<AuditStore>,
    messages: Arc<MessageStore>,
    evaluator: Arc<dyn PolicyEvaluator>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    thresholds: CircuitBreakerThresholds,
}

impl EnforcementPipeline {
    pub fn new(
        connections: Arc<ConnectionStore>,
        audit: Arc<AuditStore>,
        messages: Arc<MessageStore>,
        evaluator: Arc<dyn PolicyEvaluator>,
        thresholds: CircuitBreakerThresholds,
    ) -> Self {
        Self {
            connections,
            audit,
            messages,
            evaluator,
            breakers: Mutex::new(HashMap::new()),
            thresholds,
        }
    }

    /// Run one inbound message through the full pipeline.
    pub async fn process(&self, incoming: &IncomingMessage) -> Result<PipelineOutcome> {
        let peer = &incoming.from_address;
        let message_id_hex = hex::encode(&incoming.message_id);

        let Some(connection) = self.connections.get(peer)? else {
            self.log(peer, EventType::PermissionViolation, Some(&incoming.message_id), None)?;
            self.set_message_state(&message_id_hex, "failed", Some("unknown sender"))?;
            return Ok(PipelineOutcome::Denied {
                reason: "unknown sender".to_string(),
            });
        };

        if connection.muted {
            self.log(peer, EventType::MessageReceivedMuted, Some(&incoming.message_id), None)?;
            self.set_message_state(&message_id_hex, "delivered", None)?;
            return Ok(PipelineOutcome::Muted);
        }

        if connection.passthrough {
            self.log(peer, EventType::MessageDuringIntervention, Some(&incoming.message_id), None)?;
            self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
            return Ok(PipelineOutcome::Passthrough);
        }

        let evaluator = self.evaluator.clone();
        let enforcer = PermissionsEnforcer::new(evaluator.as_ref());
        match enforcer.check(&incoming.text, &connection).await {
            PermissionVerdict::Deny { reason } => {
                self.log(peer, EventType::PermissionViolation, Some(&incoming.message_id), None)?;
                if !connection.circuit_breaker_tripped {
                    if let Some(trip) = self.record(peer, BreakerTrigger::PermissionViolation) {
                        self.trip_breaker(peer, trip.trigger)?;
                        self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
                        return Ok(PipelineOutcome::CircuitBreakerTripped {
                            trigger: trip.trigger.name(),
                        });
                    }
                }
                self.set_message_state(&message_id_hex, "failed", Some(&reason))?;
                return Ok(PipelineOutcome::Denied { reason });
            }
            PermissionVerdict::Escalate { reason } => {
                self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
                return Ok(PipelineOutcome::Escalated { reason });
            }
            PermissionVerdict::Allow => {}
        }

        // The breaker trips once and stays tripped until the human
        // re-upgrades autonomy (which clears the flag) — don't keep
        // re-recording once it has already fired for this connection.
        if !connection.circuit_breaker_tripped {
            if let Some(trip) = self.record(peer, BreakerTrigger::MessageFlood) {
                self.trip_breaker(peer, trip.trigger)?;
                // The breaker downgrades autonomy to full_manual before
                // this message reaches routing, so it lands the same
                // place a full_manual message would: escalated.
                self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
                return Ok(PipelineOutcome::CircuitBreakerTripped {
                    trigger: trip.trigger.name(),
                });
            }
        }

        // Autonomy routing (§4.7.5) reads whatever level is current at
        // this point, which may have just been downgraded above.
        let autonomy = self.connections.get(peer)?.map(|c| c.autonomy).unwrap_or(connection.autonomy);

        match autonomy {
            AutonomyLevel::FullManual => {
                self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
                Ok(PipelineOutcome::Routed { autonomy })
            }
            AutonomyLevel::Notify => {
                self.log(peer, EventType::MessageProcessedAutonomously, Some(&incoming.message_id), None)?;
                self.set_message_state(&message_id_hex, "read_by_agent", None)?;
                Ok(PipelineOutcome::Routed { autonomy })
            }
            AutonomyLevel::FullAuto => {
                self.set_message_state(&message_id_hex, "read_by_agent", None)?;
                Ok(PipelineOutcome::Routed { autonomy })
            }
            AutonomyLevel::AutoRespond => {
                let Some(policy) = connection.auto_respond_policy.clone() else {
                    self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
                    return Ok(PipelineOutcome::Routed { autonomy });
                };
                self.set_message_state(&message_id_hex, "pending_policy_eval", None)?;
                let request = PolicyRequest {
                    policy,
                    message_body: incoming.text.clone(),
                    sender_address: peer.clone(),
                    nickname: connection.nickname.clone(),
                };
                let decision = match self.evaluator.evaluate_policy(&request).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        warn!(error = %e, peer = %peer, "policy evaluator failed, escalating");
                        PolicyDecision::Escalate {
                            reasoning: format!("policy evaluator failure: {e}"),
                        }
                    }
                };
                self.log(
                    peer,
                    EventType::AutoRespondDecision,
                    Some(&incoming.message_id),
                    Some(serde_json::to_value(&decision)?),
                )?;
                match &decision {
                    PolicyDecision::Allow { .. } => {
                        self.set_message_state(&message_id_hex, "read_by_agent", None)?;
                    }
                    PolicyDecision::Deny { reasoning } => {
                        self.set_message_state(&message_id_hex, "failed", Some(reasoning))?;
                    }
                    PolicyDecision::Escalate { .. } => {
                        self.set_message_state(&message_id_hex, "escalated_to_human", None)?;
                    }
                }
                Ok(PipelineOutcome::AutoRespondEvaluated { decision })
            }
        }
    }

    fn set_message_state(&self, message_id_hex: &str, state: &str, failure_reason: Option<&str>) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        self.messages.update_state(message_id_hex, state, failure_reason, now_ms)
    }

    fn record(&self, peer: &str, trigger: BreakerTrigger) -> Option<crate::circuit_breaker::BreakerTrip> {
        let mut breakers = self.breakers.lock().unwrap();
        let breaker = breakers.entry(peer.to_string()).or_default();
        breaker.record(trigger, &self.thresholds)
    }

    fn trip_breaker(&self, peer: &str, trigger: BreakerTrigger) -> Result<()> {
        if let Some(mut connection) = self.connections.get(peer)? {
            connection.autonomy = AutonomyLevel::FullManual;
            connection.circuit_breaker_tripped = true;
            connection.touch();
            self.connections.upsert(connection)?;
        }
        self.log(
            peer,
            EventType::CircuitBreakerTripped,
            None,
            Some(serde_json::json!({ "trigger": trigger.name() })),
        )
    }

    fn log(
        &self,
        peer: &str,
        event_type: EventType,
        message_id: Option<&[u8]>,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut event = NewEvent::new(peer.to_string(), event_type);
        if let Some(id) = message_id {
            event = event.with_message_id(hex::encode(id));
        }
        if let Some(details) = details {
            event = event.with_details(details);
        }
        self.audit.append(event)?;
        Ok(())
    }
}
