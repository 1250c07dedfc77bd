use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A session's interest in a channel, created on subscribe and ended on
/// unsubscribe or session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub session_id: Uuid,
    pub channel: String,
    pub replay_cursor: Option<String>,
    pub filter: Option<String>,
}
