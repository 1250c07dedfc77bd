use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant root and isolation boundary. Every other entity is scoped to
/// exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Organization {
    pub id: Uuid,
    pub slug: String,
    pub max_users: i32,
    pub max_connections: i32,
    pub max_events_per_hour: i32,
    pub max_channels: i32,
    pub max_storage_bytes: i64,
    pub max_api_calls_per_hour: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The subset of an organization's limits the enforcement pipeline actually
/// consults on the hot path, decoupled from persistence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrganizationLimits {
    pub max_connections: i32,
    pub max_events_per_hour: i32,
    pub max_channels: i32,
    pub max_api_calls_per_hour: i32,
}

impl From<&Organization> for OrganizationLimits {
    fn from(org: &Organization) -> Self {
        Self {
            max_connections: org.max_connections,
            max_events_per_hour: org.max_events_per_hour,
            max_channels: org.max_channels,
            max_api_calls_per_hour: org.max_api_calls_per_hour,
        }
    }
}

impl Default for OrganizationLimits {
    fn default() -> Self {
        Self {
            max_connections: 1_000,
            max_events_per_hour: 360_000,
            max_channels: 1_000,
            max_api_calls_per_hour: 100_000,
        }
    }
}
