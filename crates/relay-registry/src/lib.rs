//! Server registry (§4.2): gateway nodes publish liveness and load here, and
//! any node can ask "which server should handle a new connection for this
//! org".

use relay_common::error::Result;
use relay_common::redis_client::RedisClient;
use relay_domain::Server;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const SERVER_SET_KEY: &str = "servers:active";

/// Placement policy for `get_best_server`. Only `LowestLoad` exists today;
/// the type exists so a future sticky-affinity policy doesn't need a
/// signature change, only a new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    #[default]
    LowestLoad,
}

pub struct Registry {
    redis: Arc<Mutex<RedisClient>>,
    heartbeat_ttl_secs: u64,
}

impl Registry {
    pub fn new(redis: Arc<Mutex<RedisClient>>, heartbeat_ttl_secs: u64) -> Self {
        Self {
            redis,
            heartbeat_ttl_secs,
        }
    }

    fn server_key(id: Uuid) -> String {
        format!("server:{}", id)
    }

    /// Write (or refresh) a server's hash record and add it to the active
    /// set. The hash's own TTL is the liveness signal — a node that stops
    /// heartbeating simply expires out.
    pub async fn heartbeat(&self, server: &Server) -> Result<()> {
        let key = Self::server_key(server.id);
        let mut redis = self.redis.lock().await;
        redis.hset_all(&key, &server.to_hash_fields()).await?;
        redis.expire(&key, self.heartbeat_ttl_secs as i64).await?;
        redis.sadd(SERVER_SET_KEY, &server.id.to_string()).await?;
        Ok(())
    }

    /// Explicit deregistration on graceful shutdown, ahead of TTL expiry.
    pub async fn deregister(&self, server_id: Uuid) -> Result<()> {
        let key = Self::server_key(server_id);
        let mut redis = self.redis.lock().await;
        redis.del(&key).await?;
        redis.srem(SERVER_SET_KEY, &server_id.to_string()).await?;
        Ok(())
    }

    /// All servers whose hash record hasn't expired. Entries in the active
    /// set with no surviving hash (TTL already passed) are pruned as found.
    pub async fn active_servers(&self) -> Result<Vec<Server>> {
        let mut redis = self.redis.lock().await;
        let ids = redis.smembers(SERVER_SET_KEY).await?;
        let mut servers = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();

        for id_str in ids {
            let Ok(id) = id_str.parse::<Uuid>() else {
                stale.push(id_str);
                continue;
            };
            let fields = redis.hgetall(&Self::server_key(id)).await?;
            match Server::from_hash_fields(id, &fields) {
                Some(server) => servers.push(server),
                None => stale.push(id_str),
            }
        }

        for id_str in stale {
            redis.srem(SERVER_SET_KEY, &id_str).await?;
        }

        Ok(servers)
    }

    /// The lowest-load-score active server, ties broken by earliest
    /// `started_at` (the longer-lived, presumably more stable node wins).
    /// `org_id` is accepted, not yet consulted, so a future sticky-affinity
    /// `policy` can prefer a node already hosting sessions for that org
    /// without another signature change.
    pub async fn get_best_server(&self, _org_id: Uuid, _policy: PlacementPolicy) -> Result<Option<Server>> {
        let mut servers = self.active_servers().await?;
        servers.sort_by(|a, b| {
            a.load_score()
                .partial_cmp(&b.load_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.started_at.cmp(&b.started_at))
        });
        Ok(servers.into_iter().next())
    }

    /// Periodic heartbeat emission until `shutdown` fires, at which point the
    /// server deregisters itself rather than waiting out the TTL.
    pub async fn run_heartbeat_loop(
        self: Arc<Self>,
        server: Arc<Mutex<Server>>,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let server_id = server.lock().await.id;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = server.lock().await.clone();
                    if let Err(e) = self.heartbeat(&snapshot).await {
                        warn!(%server_id, error = %e, "heartbeat failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!(%server_id, "deregistering on shutdown");
                    if let Err(e) = self.deregister(server_id).await {
                        warn!(%server_id, error = %e, "deregister failed");
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_server(id: Uuid, connection_count: u32, started_offset_secs: i64) -> Server {
        Server {
            id,
            host: "10.0.0.1".into(),
            port: 8080,
            protocol: "ws".into(),
            version: "1.0.0".into(),
            connection_count,
            cpu_percent: 0.3,
            mem_percent: 0.2,
            started_at: Utc::now() - chrono::Duration::seconds(started_offset_secs),
            last_heartbeat: Utc::now(),
        }
    }

    #[tokio::test]
    async fn best_server_prefers_lowest_load_score() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let registry = Registry::new(Arc::new(Mutex::new(client)), 30);

            let light = sample_server(Uuid::new_v4(), 100, 60);
            let heavy = sample_server(Uuid::new_v4(), 9_000, 60);
            registry.heartbeat(&light).await.unwrap();
            registry.heartbeat(&heavy).await.unwrap();

            let best = registry.get_best_server(Uuid::new_v4(), PlacementPolicy::LowestLoad).await.unwrap().unwrap();
            assert_eq!(best.id, light.id);

            registry.deregister(light.id).await.unwrap();
            registry.deregister(heavy.id).await.unwrap();
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }

    #[tokio::test]
    async fn ties_broken_by_earliest_start() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let registry = Registry::new(Arc::new(Mutex::new(client)), 30);

            let older = sample_server(Uuid::new_v4(), 100, 3_600);
            let newer = sample_server(Uuid::new_v4(), 100, 60);
            registry.heartbeat(&older).await.unwrap();
            registry.heartbeat(&newer).await.unwrap();

            let best = registry.get_best_server(Uuid::new_v4(), PlacementPolicy::LowestLoad).await.unwrap().unwrap();
            assert_eq!(best.id, older.id);

            registry.deregister(older.id).await.unwrap();
            registry.deregister(newer.id).await.unwrap();
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }
}
