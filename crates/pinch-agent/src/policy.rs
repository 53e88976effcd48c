//! The policy-evaluator interface (§1: "the LLM that backs the policy
//! evaluator" is out of scope, specified only by interface). This
//! module defines the trait the enforcement pipeline and permissions
//! enforcer call through, plus a safe-default evaluator used when the
//! caller wires none in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy evaluator error: {0}")]
    Evaluator(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow { reasoning: Option<String> },
    Deny { reasoning: String },
    Escalate { reasoning: String },
}

/// Input to `policyEvaluator.evaluatePolicy` (§4.7.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub policy: String,
    pub message_body: String,
    pub sender_address: String,
    pub nickname: Option<String>,
}

/// Confidence + reasoning recorded alongside every auto-respond
/// decision in the activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub decision: PolicyDecision,
    pub confidence: Option<f64>,
}

/// Interface-only boundary to the LLM-backed policy evaluator. Real
/// deployments wire in an implementation that calls out to a model;
/// this crate ships only the trait and a safe-default.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// `policyEvaluator` invoked with `{boundaries, content}` for
    /// information-boundary checks (§4.7.3).
    async fn evaluate_boundary(&self, boundary: &str, content: &str) -> Result<PolicyDecision>;

    /// `policyEvaluator.evaluatePolicy` for auto-respond evaluation
    /// (§4.7.6).
    async fn evaluate_policy(&self, request: &PolicyRequest) -> Result<PolicyDecision>;
}

/// A policy evaluator that always escalates — the safe default when no
/// real evaluator is configured. Every decision from a real evaluator
/// failing (timeout, error) is treated the same way by callers.
pub struct NullPolicyEvaluator;

#[async_trait]
impl PolicyEvaluator for NullPolicyEvaluator {
    async fn evaluate_boundary(&self, _boundary: &str, _content: &str) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Escalate {
            reasoning: "no policy evaluator configured".to_string(),
        })
    }

    async fn evaluate_policy(&self, _request: &PolicyRequest) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Escalate {
            reasoning: "no policy evaluator configured".to_string(),
        })
    }
}
