//! The Pinch agent engine: relay transport, connection lifecycle,
//! message encryption, the inbound enforcement pipeline, and the
//! hash-chained audit log, wired together by [`engine::PinchAgent`].

mod audit;
mod circuit_breaker;
mod config;
mod connection;
mod engine;
mod error;
mod message;
mod permissions;
mod pipeline;
mod policy;
mod store;
mod transport;

pub use audit::{verify_chain, ActivityEvent, EventType, NewEvent};
pub use circuit_breaker::{BreakerTrigger, BreakerTrip, CircuitBreaker};
pub use config::{AgentConfig, CircuitBreakerThresholds};
pub use connection::{AutonomyLevel, Connection, ConnectionManager, ConnectionState};
pub use engine::PinchAgent;
pub use error::{AgentError, Result};
pub use message::{IncomingMessage, MessageEngine, MessagePriority};
pub use permissions::{
    ActionsTier, CalendarTier, CustomCategory, FilesTier, PermissionVerdict, PermissionsEnforcer,
    PermissionsManifest, SpendingCaps,
};
pub use pipeline::{EnforcementPipeline, PipelineOutcome};
pub use policy::{NullPolicyEvaluator, PolicyDecision, PolicyEvaluator, PolicyOutcome, PolicyRequest};
pub use store::audit_store::AuditStore;
pub use store::connection_store::ConnectionStore;
pub use store::message_store::{Direction, MessageRecord, MessageStore};
pub use transport::{DisconnectHandler, EnvelopeHandler, PinchTransport, TransportHandle, TransportOps};
