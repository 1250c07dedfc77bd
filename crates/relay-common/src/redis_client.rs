//! KV/pubsub substrate client.
//!
//! Thin wrapper around `redis::aio::ConnectionManager` exposing the exact
//! operations the rest of the workspace needs: plain get/set, atomic counters
//! with TTL, compare-and-swap, hash records, set membership, pubsub, and
//! stream/consumer-group operations for the event stream.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;

pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("connecting to substrate at {}", redis_url);
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    pub async fn ping(&mut self) -> Result<String> {
        let result: String = redis::cmd("PING").query_async(&mut self.manager).await?;
        Ok(result)
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.manager.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    pub async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.manager.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let result: Option<String> = self.manager.get(key).await?;
        Ok(result)
    }

    pub async fn del(&mut self, key: &str) -> Result<()> {
        self.manager.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn expire(&mut self, key: &str, ttl_secs: i64) -> Result<()> {
        self.manager.expire::<_, ()>(key, ttl_secs).await?;
        Ok(())
    }

    /// Atomically set `key` to `value` with TTL only if it does not already
    /// exist. Returns `true` if the key was claimed by this call. Backs both
    /// session-ownership CAS (§4.3 migration) and exactly-once delivery
    /// markers (§4.6).
    pub async fn set_nx_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let result: RedisResult<Option<String>> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut self.manager)
            .await;

        match result {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare-and-swap `key`'s value from `expected` to `new`. Used for
    /// session-ownership transfer: fails (returns `false`) if another node
    /// has already moved the key, signalling the caller to abort and retry.
    pub async fn cas(&mut self, key: &str, expected: &str, new: &str) -> Result<bool> {
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                redis.call("SET", KEYS[1], ARGV[2])
                return 1
            else
                return 0
            end
            "#,
        );
        let result: i32 = script
            .key(key)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut self.manager)
            .await?;
        Ok(result == 1)
    }

    /// Atomic increment of a counter key, creating it with `ttl_secs` if
    /// absent. Used for the tenant rate-limit and quota buckets.
    pub async fn incr_with_ttl(&mut self, key: &str, ttl_secs: i64) -> Result<i64> {
        let script = redis::Script::new(
            r#"
            local v = redis.call("INCR", KEYS[1])
            if v == 1 then
                redis.call("EXPIRE", KEYS[1], ARGV[1])
            end
            return v
            "#,
        );
        let value: i64 = script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut self.manager)
            .await?;
        Ok(value)
    }

    pub async fn hset_all(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let pairs: Vec<(&str, String)> = fields.to_vec();
        self.manager.hset_multiple::<_, _, _, ()>(key, &pairs).await?;
        Ok(())
    }

    pub async fn hgetall(&mut self, key: &str) -> Result<std::collections::HashMap<String, String>> {
        let result = self.manager.hgetall(key).await?;
        Ok(result)
    }

    pub async fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        self.manager.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    pub async fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        self.manager.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    pub async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        let members = self.manager.smembers(key).await?;
        Ok(members)
    }

    pub async fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let keys = self.manager.keys(pattern).await?;
        Ok(keys)
    }

    pub async fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
        self.manager.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    // --- Streams -----------------------------------------------------

    /// Append a record to a stream, auto-assigning a monotonic entry id.
    pub async fn xadd<T: Serialize>(&mut self, stream: &str, data: &T) -> Result<String> {
        let json = serde_json::to_string(data)?;
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("data")
            .arg(json)
            .query_async(&mut self.manager)
            .await?;
        Ok(id)
    }

    /// Read entries with id strictly greater than `from_id`, oldest first.
    pub async fn xread(&mut self, stream: &str, from_id: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let result: RedisResult<Vec<(String, Vec<(String, Vec<(String, String)>)>)>> =
            redis::cmd("XREAD")
                .arg("COUNT")
                .arg(count)
                .arg("STREAMS")
                .arg(stream)
                .arg(from_id)
                .query_async(&mut self.manager)
                .await;

        match result {
            Ok(streams) => Ok(flatten_stream_entries(streams)),
            Err(e) => {
                error!("xread failed on {}: {}", stream, e);
                Err(e.into())
            }
        }
    }

    pub async fn xgroup_create(&mut self, stream: &str, group: &str) -> Result<()> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.manager)
            .await;
        // BUSYGROUP means the group already exists — not an error for us.
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking consumer-group read. `block_ms == 0` blocks forever.
    pub async fn xreadgroup(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let result: RedisResult<Vec<(String, Vec<(String, Vec<(String, String)>)>)>> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group)
                .arg(consumer)
                .arg("COUNT")
                .arg(count)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(stream)
                .arg(">")
                .query_async(&mut self.manager)
                .await;

        match result {
            Ok(streams) => Ok(flatten_stream_entries(streams)),
            Err(e) if e.to_string().contains("NOGROUP") => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn xack(&mut self, stream: &str, group: &str, id: &str) -> Result<()> {
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async::<_, i64>(&mut self.manager)
            .await?;
        Ok(())
    }

    /// Entries pending longer than `min_idle_ms` for the group, up to
    /// `count`, claimed for `consumer` — drives re-delivery after a
    /// visibility timeout.
    pub async fn xautoclaim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let result: RedisResult<(String, Vec<(String, Vec<(String, String)>)>, Vec<String>)> =
            redis::cmd("XAUTOCLAIM")
                .arg(stream)
                .arg(group)
                .arg(consumer)
                .arg(min_idle_ms)
                .arg("0")
                .arg("COUNT")
                .arg(count)
                .query_async(&mut self.manager)
                .await;

        match result {
            Ok((_cursor, entries, _deleted)) => Ok(entries
                .into_iter()
                .filter_map(|(id, fields)| {
                    fields
                        .into_iter()
                        .find(|(k, _)| k == "data")
                        .map(|(_, data)| StreamEntry { id, data })
                })
                .collect()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn xtrim(&mut self, stream: &str, max_length: usize) -> Result<()> {
        redis::cmd("XTRIM")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_length)
            .query_async::<_, i64>(&mut self.manager)
            .await?;
        Ok(())
    }

    pub async fn lpush<T: Serialize>(&mut self, list: &str, data: &T) -> Result<()> {
        let json = serde_json::to_string(data)?;
        self.manager.lpush::<_, _, ()>(list, json).await?;
        Ok(())
    }

    pub async fn brpop(&mut self, list: &str, timeout: usize) -> Result<Option<String>> {
        let result: Option<(String, String)> = self.manager.brpop(list, timeout as f64).await?;
        Ok(result.map(|(_, value)| value))
    }
}

fn flatten_stream_entries(
    streams: Vec<(String, Vec<(String, Vec<(String, String)>)>)>,
) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    for (_stream_name, stream_entries) in streams {
        for (entry_id, fields) in stream_entries {
            if let Some((_key, json_data)) = fields.into_iter().find(|(k, _)| k == "data") {
                entries.push(StreamEntry {
                    id: entry_id,
                    data: json_data,
                });
            }
        }
    }
    entries
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_pings() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let mut client = RedisClient::new(&redis_url).await.unwrap();
            assert_eq!(client.ping().await.unwrap(), "PONG");
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }

    #[tokio::test]
    async fn set_nx_ex_only_claims_once() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let mut client = RedisClient::new(&redis_url).await.unwrap();
            let key = format!("test:cas:{}", uuid::Uuid::new_v4());
            assert!(client.set_nx_ex(&key, "owner-a", 5).await.unwrap());
            assert!(!client.set_nx_ex(&key, "owner-b", 5).await.unwrap());
            client.del(&key).await.unwrap();
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }

    #[tokio::test]
    async fn incr_with_ttl_accumulates() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let mut client = RedisClient::new(&redis_url).await.unwrap();
            let key = format!("test:counter:{}", uuid::Uuid::new_v4());
            assert_eq!(client.incr_with_ttl(&key, 5).await.unwrap(), 1);
            assert_eq!(client.incr_with_ttl(&key, 5).await.unwrap(), 2);
            client.del(&key).await.unwrap();
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }
}
