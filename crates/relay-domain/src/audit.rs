use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A security-relevant action, appended for auth failures, rate-limit and
/// quota trips, subscribe/unsubscribe, and publish, per §4.5 item 6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuditRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub actor_id: String,
    pub action: String,
    pub resource: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub severity: AuditSeverity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "VARCHAR", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl AuditRecord {
    pub fn new(
        org_id: Uuid,
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        severity: AuditSeverity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            actor_id: actor_id.into(),
            action: action.into(),
            resource: resource.into(),
            before: None,
            after: None,
            timestamp: Utc::now(),
            severity,
        }
    }
}
