//! Cross-Server Router (§4.4): fans a published event out to the right
//! local sockets on the right nodes over a single shared pubsub channel.

use crate::frames::ServerFrame;
use crate::session::ConnectionManager;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_common::error::Result;
use relay_common::metrics::ROUTER_MESSAGES_DROPPED_TOTAL;
use relay_common::redis_client::RedisClient;
use relay_domain::event::EventFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

pub const ROUTER_PUBSUB_CHANNEL: &str = "relay:router";

/// The wire envelope published on the shared pubsub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterEnvelope {
    pub message_id: Uuid,
    pub from_server_id: Uuid,
    pub to_server_ids: Option<Vec<Uuid>>,
    pub org_id: Uuid,
    pub channel: String,
    pub event: EventFrame,
    pub sent_at: DateTime<Utc>,
}

/// A socket this node owns: enough state for the router to decide whether
/// to push a frame to it.
pub struct LocalSocket {
    pub org_id: Uuid,
    pub channels: RwLock<HashSet<String>>,
    pub sender: mpsc::UnboundedSender<ServerFrame>,
}

pub type LocalSockets = Arc<DashMap<Uuid, Arc<LocalSocket>>>;

pub struct Router {
    server_id: Uuid,
    redis: Arc<Mutex<RedisClient>>,
    local_sockets: LocalSockets,
    max_skew: chrono::Duration,
}

impl Router {
    pub fn new(
        server_id: Uuid,
        redis: Arc<Mutex<RedisClient>>,
        local_sockets: LocalSockets,
        max_skew_secs: i64,
    ) -> Self {
        Self {
            server_id,
            redis,
            local_sockets,
            max_skew: chrono::Duration::seconds(max_skew_secs),
        }
    }

    /// Addressing mode: broadcast (to_server_ids = None reaches every node;
    /// by-channel routing is this same broadcast with local filtering).
    pub async fn broadcast(&self, org_id: Uuid, channel: &str, event: EventFrame) -> Result<()> {
        self.publish(org_id, channel, event, None).await
    }

    /// Targeted addressing mode: only the listed nodes act on it.
    pub async fn send_to_servers(
        &self,
        org_id: Uuid,
        channel: &str,
        event: EventFrame,
        server_ids: Vec<Uuid>,
    ) -> Result<()> {
        self.publish(org_id, channel, event, Some(server_ids)).await
    }

    /// By-user addressing mode: look up the one node that currently owns
    /// `user_id`'s session and route there. A no-op (not an error) if the
    /// user has no live session anywhere.
    pub async fn send_to_user(
        &self,
        connections: &ConnectionManager,
        org_id: Uuid,
        user_id: &str,
        channel: &str,
        event: EventFrame,
    ) -> Result<()> {
        match connections.find_user_server(user_id).await? {
            Some(server_id) => self.send_to_servers(org_id, channel, event, vec![server_id]).await,
            None => {
                debug!(user_id = %user_id, "send_to_user found no owning server, dropping");
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        org_id: Uuid,
        channel: &str,
        event: EventFrame,
        to_server_ids: Option<Vec<Uuid>>,
    ) -> Result<()> {
        let envelope = RouterEnvelope {
            message_id: Uuid::new_v4(),
            from_server_id: self.server_id,
            to_server_ids,
            org_id,
            channel: channel.to_string(),
            event,
            sent_at: Utc::now(),
        };
        let json = serde_json::to_string(&envelope)?;
        self.redis.lock().await.publish(ROUTER_PUBSUB_CHANNEL, &json).await
    }

    /// Handle one envelope received off the pubsub subscription: drop
    /// self-echo, drop stale and unaddressed messages, else dispatch to
    /// every matching local socket.
    pub fn handle_envelope(&self, envelope: RouterEnvelope) {
        if let Some(reason) = should_drop(&envelope, self.server_id, self.max_skew) {
            if reason == "stale" {
                ROUTER_MESSAGES_DROPPED_TOTAL.with_label_values(&["stale"]).inc();
                warn!(message_id = %envelope.message_id, "dropping stale router envelope");
            }
            return;
        }

        let dispatched = dispatch_to_local(&self.local_sockets, envelope.org_id, &envelope.channel, &envelope.event);
        if dispatched == 0 {
            debug!(message_id = %envelope.message_id, "router envelope matched no local sockets");
        }
    }

    /// Run the pubsub subscriber loop until cancelled. One subscription per
    /// node, established on startup, per §4.4.
    pub async fn run_subscriber(
        self: Arc<Self>,
        redis_url: String,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_async_connection().await?;
        let mut pubsub = connection.into_pubsub();
        pubsub.subscribe(ROUTER_PUBSUB_CHANNEL).await?;
        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = futures::StreamExt::next(&mut stream) => {
                    let Some(msg) = msg else { break };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "router pubsub payload decode failed");
                            continue;
                        }
                    };
                    match serde_json::from_str::<RouterEnvelope>(&payload) {
                        Ok(envelope) => self.handle_envelope(envelope),
                        Err(e) => warn!(error = %e, "router envelope decode failed"),
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Push `event` to every local socket in `org_id` subscribed to `channel`.
/// Shared by the pubsub receive path and by a node's own publish handler
/// (which must deliver to its own local sockets directly, since the router
/// drops self-echo).
pub fn dispatch_to_local(
    local_sockets: &LocalSockets,
    org_id: Uuid,
    channel: &str,
    event: &EventFrame,
) -> usize {
    let mut dispatched = 0;
    for entry in local_sockets.iter() {
        let socket = entry.value();
        if socket.org_id != org_id {
            continue;
        }
        if !socket.channels.read().unwrap().contains(channel) {
            continue;
        }
        let frame = ServerFrame::Event { event: event.clone() };
        if socket.sender.send(frame).is_ok() {
            dispatched += 1;
        }
    }
    dispatched
}

/// Pure decision logic for envelope admission, split out from `handle_envelope`
/// so it can be tested without a live substrate connection.
fn should_drop(
    envelope: &RouterEnvelope,
    server_id: Uuid,
    max_skew: chrono::Duration,
) -> Option<&'static str> {
    if envelope.from_server_id == server_id {
        return Some("self_echo");
    }
    if let Some(targets) = &envelope.to_server_ids {
        if !targets.contains(&server_id) {
            return Some("not_addressed");
        }
    }
    if Utc::now() - envelope.sent_at > max_skew {
        return Some("stale");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> EventFrame {
        EventFrame {
            id: "1-0".into(),
            event_type: "msg".into(),
            channel: "org:x:chat".into(),
            payload: json!({}),
            timestamp: Utc::now(),
            metadata: json!({}),
        }
    }

    fn sample_envelope(from: Uuid, to: Option<Vec<Uuid>>, sent_at: DateTime<Utc>) -> RouterEnvelope {
        RouterEnvelope {
            message_id: Uuid::new_v4(),
            from_server_id: from,
            to_server_ids: to,
            org_id: Uuid::new_v4(),
            channel: "org:x:chat".into(),
            event: sample_event(),
            sent_at,
        }
    }

    #[test]
    fn self_echo_is_dropped() {
        let server_id = Uuid::new_v4();
        let envelope = sample_envelope(server_id, None, Utc::now());
        assert_eq!(
            should_drop(&envelope, server_id, chrono::Duration::seconds(30)),
            Some("self_echo")
        );
    }

    #[test]
    fn unaddressed_targeted_message_is_dropped() {
        let server_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let envelope = sample_envelope(Uuid::new_v4(), Some(vec![other]), Utc::now());
        assert_eq!(
            should_drop(&envelope, server_id, chrono::Duration::seconds(30)),
            Some("not_addressed")
        );
    }

    #[test]
    fn stale_message_is_dropped() {
        let server_id = Uuid::new_v4();
        let old = Utc::now() - chrono::Duration::seconds(60);
        let envelope = sample_envelope(Uuid::new_v4(), None, old);
        assert_eq!(
            should_drop(&envelope, server_id, chrono::Duration::seconds(30)),
            Some("stale")
        );
    }

    #[test]
    fn fresh_broadcast_is_admitted() {
        let server_id = Uuid::new_v4();
        let envelope = sample_envelope(Uuid::new_v4(), None, Utc::now());
        assert_eq!(should_drop(&envelope, server_id, chrono::Duration::seconds(30)), None);
    }

    #[tokio::test]
    async fn send_to_user_with_no_session_is_a_no_op() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let redis = Arc::new(Mutex::new(client));
            let connections = ConnectionManager::new(redis.clone());
            let local_sockets: LocalSockets = Arc::new(DashMap::new());
            let router = Router::new(Uuid::new_v4(), redis, local_sockets, 30);

            let result = router
                .send_to_user(&connections, Uuid::new_v4(), "nobody", "org:x:chat", sample_event())
                .await;
            assert!(result.is_ok());
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }
}
