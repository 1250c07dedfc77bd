use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single append to the event stream. `id` is the stream-assigned id
/// (Redis Streams' own monotonic `<ms>-<seq>` form), not generated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub org_id: Uuid,
    pub channel: String,
    pub event_type: String,
    pub payload: Value,
    pub source_user_id: String,
    pub created_at: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub attempt_count: u32,
}

impl Event {
    pub fn new(
        org_id: Uuid,
        channel: String,
        event_type: String,
        payload: Value,
        source_user_id: String,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: String::new(),
            org_id,
            channel,
            event_type,
            payload,
            source_user_id,
            created_at: Utc::now(),
            correlation_id,
            attempt_count: 0,
        }
    }
}

/// The server-push frame shape of §6: `event { id, type, channel, payload,
/// timestamp, metadata }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub channel: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

impl From<Event> for EventFrame {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            channel: event.channel,
            payload: event.payload,
            timestamp: event.created_at,
            metadata: serde_json::json!({ "correlation_id": event.correlation_id }),
        }
    }
}
