//! Permissions manifest (§3) and the permissions-enforcement step of
//! the inbound pipeline (§4.7.3).

use serde::{Deserialize, Serialize};

use crate::connection::{Connection, ConnectionState};
use crate::policy::{PolicyDecision, PolicyEvaluator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarTier {
    None,
    FreeBusyOnly,
    FullDetails,
    ProposeAndBook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesTier {
    None,
    SpecificFolders,
    Everything,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionsTier {
    None,
    Scoped,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingCaps {
    pub per_transaction: f64,
    pub per_day: f64,
    pub per_connection: f64,
}

impl SpendingCaps {
    pub fn zero() -> Self {
        Self {
            per_transaction: 0.0,
            per_day: 0.0,
            per_connection: 0.0,
        }
    }

    /// All caps must be non-negative (§3 invariant).
    pub fn is_valid(&self) -> bool {
        self.per_transaction >= 0.0 && self.per_day >= 0.0 && self.per_connection >= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCategory {
    pub name: String,
    pub description: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsManifest {
    pub calendar: CalendarTier,
    pub files: FilesTier,
    pub files_folders: Option<Vec<String>>,
    pub actions: ActionsTier,
    pub actions_scope: Option<Vec<String>>,
    pub spending: SpendingCaps,
    pub information_boundaries: Option<String>,
    pub custom_categories: Vec<CustomCategory>,
}

impl PermissionsManifest {
    /// New connections receive a deny-all manifest (§3).
    pub fn deny_all() -> Self {
        Self {
            calendar: CalendarTier::None,
            files: FilesTier::None,
            files_folders: None,
            actions: ActionsTier::None,
            actions_scope: None,
            spending: SpendingCaps::zero(),
            information_boundaries: None,
            custom_categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionVerdict {
    Allow,
    /// Hard deny: message state becomes `failed`, a circuit-breaker
    /// violation is recorded.
    Deny { reason: String },
    /// Uncertain: message state becomes `escalated_to_human`.
    Escalate { reason: String },
}

/// `permissionsEnforcer.check(body, connection)` (§4.7.3).
pub struct PermissionsEnforcer<'a> {
    evaluator: &'a dyn PolicyEvaluator,
}

impl<'a> PermissionsEnforcer<'a> {
    pub fn new(evaluator: &'a dyn PolicyEvaluator) -> Self {
        Self { evaluator }
    }

    pub async fn check(&self, body: &str, connection: &Connection) -> PermissionVerdict {
        if connection.state != ConnectionState::Active {
            return PermissionVerdict::Deny {
                reason: "unknown sender".to_string(),
            };
        }

        if let Some(boundaries) = &connection.permissions.information_boundaries {
            match self.evaluate_boundary(boundaries, body).await {
                PolicyDecision::Deny { reasoning } => {
                    return PermissionVerdict::Deny { reason: reasoning };
                }
                PolicyDecision::Escalate { reasoning } => {
                    return PermissionVerdict::Escalate { reason: reasoning };
                }
                PolicyDecision::Allow { .. } => {}
            }
        }

        for category in connection.permissions.custom_categories.iter().filter(|c| !c.allowed) {
            match self.evaluate_boundary(&category.description, body).await {
                PolicyDecision::Deny { reasoning } => {
                    return PermissionVerdict::Deny { reason: reasoning };
                }
                PolicyDecision::Escalate { reasoning } => {
                    return PermissionVerdict::Escalate { reason: reasoning };
                }
                PolicyDecision::Allow { .. } => {}
            }
        }

        PermissionVerdict::Allow
    }

    /// Any evaluator exception escalates to human (safe default).
    async fn evaluate_boundary(&self, boundary: &str, content: &str) -> PolicyDecision {
        match self.evaluator.evaluate_boundary(boundary, content).await {
            Ok(decision) => decision,
            Err(e) => PolicyDecision::Escalate {
                reasoning: format!("policy evaluator failure: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AutonomyLevel;
    use chrono::Utc;

    fn active_connection() -> Connection {
        Connection {
            peer_address: "pinch:bob@relay".to_string(),
            peer_pubkey: "abc".to_string(),
            state: ConnectionState::Active,
            nickname: None,
            autonomy: AutonomyLevel::FullManual,
            auto_respond_policy: None,
            permissions: PermissionsManifest::deny_all(),
            muted: false,
            passthrough: false,
            circuit_breaker_tripped: false,
            short_message: None,
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn unknown_or_inactive_connection_is_denied() {
        let evaluator = crate::policy::NullPolicyEvaluator;
        let enforcer = PermissionsEnforcer::new(&evaluator);
        let mut conn = active_connection();
        conn.state = ConnectionState::PendingOutbound;
        let verdict = enforcer.check("hello", &conn).await;
        assert!(matches!(verdict, PermissionVerdict::Deny { .. }));
    }

    #[tokio::test]
    async fn active_connection_with_no_boundaries_is_allowed() {
        let evaluator = crate::policy::NullPolicyEvaluator;
        let enforcer = PermissionsEnforcer::new(&evaluator);
        let conn = active_connection();
        let verdict = enforcer.check("hello", &conn).await;
        assert_eq!(verdict, PermissionVerdict::Allow);
    }

    #[tokio::test]
    async fn boundary_configured_without_evaluator_escalates() {
        let evaluator = crate::policy::NullPolicyEvaluator;
        let enforcer = PermissionsEnforcer::new(&evaluator);
        let mut conn = active_connection();
        conn.permissions.information_boundaries = Some("no salary talk".to_string());
        let verdict = enforcer.check("what's your salary", &conn).await;
        assert!(matches!(verdict, PermissionVerdict::Escalate { .. }));
    }
}
