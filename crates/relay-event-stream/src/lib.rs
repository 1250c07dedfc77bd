//! Durable, per-organization partitioned event log (§4.1).
//!
//! Backed by the KV substrate's stream type (one Redis stream per
//! `(org, channel)` pair) with consumer-group semantics for at-least-once
//! fan-out to the delivery engine.

pub mod quota;

use relay_common::error::{Error, Result};
use relay_common::redis_client::RedisClient;
use relay_domain::Event;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Default per-organization payload ceiling (§4.1: 1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Set of every channel ever appended to, so a consumer that doesn't already
/// know the channel set (the delivery engine's dispatcher) can discover which
/// per-channel streams exist without scanning keys.
const KNOWN_CHANNELS_KEY: &str = "relay:known_channels";

pub struct EventStream {
    redis: Arc<Mutex<RedisClient>>,
    max_stream_length: usize,
    max_payload_bytes: usize,
}

impl EventStream {
    pub fn new(redis: Arc<Mutex<RedisClient>>, max_stream_length: usize) -> Self {
        Self {
            redis,
            max_stream_length,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Matches `relay_domain::Channel::stream_key` — `channel` is already the
    /// full `org:{org_id}:suffix` scoped string, so the org id isn't repeated.
    fn stream_key(_org_id: Uuid, channel: &str) -> String {
        format!("stream:{}", channel)
    }

    /// Append one event, returning its stream-assigned id.
    ///
    /// Quota accounting (the org's per-hour event budget) is the caller's
    /// responsibility via [`quota`] — this only validates shape and size so
    /// the stream itself stays a dumb, fast log.
    pub async fn append(&self, mut event: Event) -> Result<String> {
        if event.channel.is_empty() || event.event_type.is_empty() {
            return Err(Error::Invalid {
                reason: "channel and type are required".into(),
            });
        }

        let payload_len = serde_json::to_vec(&event.payload)
            .map(|bytes| bytes.len())
            .unwrap_or(0);
        if payload_len > self.max_payload_bytes {
            return Err(Error::Invalid {
                reason: format!(
                    "payload of {} bytes exceeds the {} byte limit",
                    payload_len, self.max_payload_bytes
                ),
            });
        }

        let key = Self::stream_key(event.org_id, &event.channel);
        let mut redis = self.redis.lock().await;
        let id = redis.xadd(&key, &event).await?;
        if let Err(e) = redis.sadd(KNOWN_CHANNELS_KEY, &event.channel).await {
            warn!(channel = %event.channel, error = %e, "failed to record channel in known-channels set");
        }
        event.id = id.clone();
        Ok(id)
    }

    /// Every channel ever appended to, for a consumer (the delivery engine's
    /// dispatcher) that needs to discover per-channel streams rather than
    /// being told about them directly.
    pub async fn known_channels(&self) -> Result<Vec<String>> {
        self.redis.lock().await.smembers(KNOWN_CHANNELS_KEY).await
    }

    /// Events with id > `from_id`, oldest first, for replay.
    pub async fn read(
        &self,
        org_id: Uuid,
        channel: &str,
        from_id: &str,
        max_count: usize,
    ) -> Result<Vec<Event>> {
        let key = Self::stream_key(org_id, channel);
        let mut redis = self.redis.lock().await;
        let entries = redis.xread(&key, from_id, max_count).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                serde_json::from_str::<Event>(&entry.data)
                    .ok()
                    .map(|mut event| {
                        event.id = entry.id;
                        event
                    })
            })
            .collect())
    }

    /// Ensure the consumer group exists (idempotent) for a channel's stream.
    pub async fn ensure_group(&self, org_id: Uuid, channel: &str, group: &str) -> Result<()> {
        let key = Self::stream_key(org_id, channel);
        self.redis.lock().await.xgroup_create(&key, group).await
    }

    /// Blocking consumer-group read. Re-delivery of un-acked records after a
    /// visibility timeout is handled separately by [`Self::reclaim_stale`].
    pub async fn consume(
        &self,
        org_id: Uuid,
        channel: &str,
        group: &str,
        consumer_name: &str,
        block_ms: u64,
        max_count: usize,
    ) -> Result<Vec<Event>> {
        let key = Self::stream_key(org_id, channel);
        let mut redis = self.redis.lock().await;
        let entries = redis
            .xreadgroup(&key, group, consumer_name, block_ms, max_count)
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                serde_json::from_str::<Event>(&entry.data)
                    .ok()
                    .map(|mut event| {
                        event.id = entry.id;
                        event
                    })
            })
            .collect())
    }

    pub async fn ack(&self, org_id: Uuid, channel: &str, group: &str, event_id: &str) -> Result<()> {
        let key = Self::stream_key(org_id, channel);
        self.redis.lock().await.xack(&key, group, event_id).await
    }

    /// Re-deliver records that have been pending longer than the visibility
    /// timeout without an ack, to the given consumer.
    pub async fn reclaim_stale(
        &self,
        org_id: Uuid,
        channel: &str,
        group: &str,
        consumer_name: &str,
        visibility_timeout_ms: u64,
        max_count: usize,
    ) -> Result<Vec<Event>> {
        let key = Self::stream_key(org_id, channel);
        let mut redis = self.redis.lock().await;
        let entries = redis
            .xautoclaim(&key, group, consumer_name, visibility_timeout_ms, max_count)
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                serde_json::from_str::<Event>(&entry.data)
                    .ok()
                    .map(|mut event| {
                        event.id = entry.id;
                        event
                    })
            })
            .collect())
    }

    /// Background retention enforcement for one channel's stream.
    pub async fn trim(&self, org_id: Uuid, channel: &str) -> Result<()> {
        let key = Self::stream_key(org_id, channel);
        self.redis.lock().await.xtrim(&key, self.max_stream_length).await
    }

    /// Run `trim` for a fixed channel set on an interval until cancelled —
    /// the background retention task of §5.
    pub async fn run_trim_loop(
        self: Arc<Self>,
        channels: Vec<(Uuid, String)>,
        interval: std::time::Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (org_id, channel) in &channels {
                        if let Err(e) = self.trim(*org_id, channel).await {
                            warn!(%org_id, channel, error = %e, "stream trim failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::Event;
    use serde_json::json;

    fn sample_event(org_id: Uuid) -> Event {
        Event::new(
            org_id,
            format!("org:{}:chat", org_id),
            "msg".into(),
            json!({"t": "hi"}),
            "user-1".into(),
            None,
        )
    }

    #[tokio::test]
    async fn append_rejects_oversized_payload() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let stream = EventStream {
                redis: Arc::new(Mutex::new(client)),
                max_stream_length: 1000,
                max_payload_bytes: 16,
            };
            let org_id = Uuid::new_v4();
            let mut event = sample_event(org_id);
            event.payload = json!({"data": "x".repeat(100)});
            let err = stream.append(event).await.unwrap_err();
            assert!(matches!(err, Error::Invalid { .. }));
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let stream = EventStream::new(Arc::new(Mutex::new(client)), 1000);
            let org_id = Uuid::new_v4();
            let event = sample_event(org_id);
            let channel = event.channel.clone();
            let id = stream.append(event).await.unwrap();
            assert!(!id.is_empty());

            let events = stream.read(org_id, &channel, "0", 10).await.unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].payload, json!({"t": "hi"}));
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }
}
