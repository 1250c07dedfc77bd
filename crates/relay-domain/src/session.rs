use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One live client connection. Owned by the KV substrate with a TTL, not by
/// persistent storage — this type is the shape of the `session:{id}` hash,
/// not a sqlx row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: String,
    pub owning_server_id: Uuid,
    pub socket_id: String,
    pub client_type: String,
    pub channels: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Session {
    pub fn new(org_id: Uuid, user_id: String, owning_server_id: Uuid, client_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            user_id,
            owning_server_id,
            socket_id: Uuid::new_v4().to_string(),
            client_type,
            channels: HashSet::new(),
            created_at: now,
            last_heartbeat: now,
        }
    }

    pub fn to_hash_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("org_id", self.org_id.to_string()),
            ("user_id", self.user_id.clone()),
            ("owning_server_id", self.owning_server_id.to_string()),
            ("socket_id", self.socket_id.clone()),
            ("client_type", self.client_type.clone()),
            (
                "channels",
                serde_json::to_string(&self.channels).unwrap_or_default(),
            ),
            ("created_at", self.created_at.to_rfc3339()),
            ("last_heartbeat", self.last_heartbeat.to_rfc3339()),
        ]
    }

    pub fn from_hash_fields(
        id: Uuid,
        fields: &std::collections::HashMap<String, String>,
    ) -> Option<Self> {
        Some(Self {
            id,
            org_id: fields.get("org_id")?.parse().ok()?,
            user_id: fields.get("user_id")?.clone(),
            owning_server_id: fields.get("owning_server_id")?.parse().ok()?,
            socket_id: fields.get("socket_id")?.clone(),
            client_type: fields.get("client_type")?.clone(),
            channels: fields
                .get("channels")
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
            created_at: fields.get("created_at")?.parse().ok()?,
            last_heartbeat: fields.get("last_heartbeat")?.parse().ok()?,
        })
    }
}
