//! Connection Manager (§4.3): session state lives entirely in the KV
//! substrate so any node can answer "where is this user" or "what does this
//! node own" without talking to the node that owns the session.

use relay_common::error::{Error, Result};
use relay_common::redis_client::RedisClient;
use relay_domain::Session;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SESSION_TTL_SECS: u64 = 300;

pub struct ConnectionManager {
    redis: Arc<Mutex<RedisClient>>,
}

impl ConnectionManager {
    pub fn new(redis: Arc<Mutex<RedisClient>>) -> Self {
        Self { redis }
    }

    fn session_key(id: Uuid) -> String {
        format!("session:{}", id)
    }

    fn owner_key(id: Uuid) -> String {
        format!("session:{}:owner", id)
    }

    fn server_sessions_key(server_id: Uuid) -> String {
        format!("server:{}:sessions", server_id)
    }

    fn org_sessions_key(org_id: Uuid) -> String {
        format!("org:{}:sessions", org_id)
    }

    fn user_server_key(user_id: &str) -> String {
        format!("user:{}:server", user_id)
    }

    pub async fn register_session(&self, session: &Session) -> Result<()> {
        let mut redis = self.redis.lock().await;
        redis
            .hset_all(&Self::session_key(session.id), &session.to_hash_fields())
            .await?;
        redis
            .expire(&Self::session_key(session.id), SESSION_TTL_SECS as i64)
            .await?;
        redis
            .set_ex(
                &Self::owner_key(session.id),
                &session.owning_server_id.to_string(),
                SESSION_TTL_SECS,
            )
            .await?;
        redis
            .sadd(
                &Self::server_sessions_key(session.owning_server_id),
                &session.id.to_string(),
            )
            .await?;
        redis
            .sadd(&Self::org_sessions_key(session.org_id), &session.id.to_string())
            .await?;
        redis
            .set_ex(
                &Self::user_server_key(&session.user_id),
                &session.owning_server_id.to_string(),
                SESSION_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    pub async fn update_session_channels(
        &self,
        session_id: Uuid,
        channels: &std::collections::HashSet<String>,
    ) -> Result<()> {
        let mut redis = self.redis.lock().await;
        let json = serde_json::to_string(channels)?;
        redis
            .hset_all(&Self::session_key(session_id), &[("channels", json)])
            .await
    }

    /// Refresh TTLs so the session outlives the heartbeat interval.
    pub async fn heartbeat(&self, session_id: Uuid) -> Result<()> {
        let mut redis = self.redis.lock().await;
        let now = chrono::Utc::now().to_rfc3339();
        redis
            .hset_all(&Self::session_key(session_id), &[("last_heartbeat", now)])
            .await?;
        redis
            .expire(&Self::session_key(session_id), SESSION_TTL_SECS as i64)
            .await?;
        redis
            .expire(&Self::owner_key(session_id), SESSION_TTL_SECS as i64)
            .await?;
        Ok(())
    }

    pub async fn unregister_session(&self, session: &Session) -> Result<()> {
        let mut redis = self.redis.lock().await;
        redis.del(&Self::session_key(session.id)).await?;
        redis.del(&Self::owner_key(session.id)).await?;
        redis
            .srem(
                &Self::server_sessions_key(session.owning_server_id),
                &session.id.to_string(),
            )
            .await?;
        redis
            .srem(&Self::org_sessions_key(session.org_id), &session.id.to_string())
            .await?;
        redis.del(&Self::user_server_key(&session.user_id)).await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let mut redis = self.redis.lock().await;
        let fields = redis.hgetall(&Self::session_key(session_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Session::from_hash_fields(session_id, &fields))
    }

    pub async fn list_server_sessions(&self, server_id: Uuid) -> Result<Vec<Uuid>> {
        let mut redis = self.redis.lock().await;
        let ids = redis.smembers(&Self::server_sessions_key(server_id)).await?;
        Ok(ids.into_iter().filter_map(|id| id.parse().ok()).collect())
    }

    pub async fn list_org_sessions(&self, org_id: Uuid) -> Result<Vec<Uuid>> {
        let mut redis = self.redis.lock().await;
        let ids = redis.smembers(&Self::org_sessions_key(org_id)).await?;
        Ok(ids.into_iter().filter_map(|id| id.parse().ok()).collect())
    }

    pub async fn find_user_server(&self, user_id: &str) -> Result<Option<Uuid>> {
        let mut redis = self.redis.lock().await;
        let server_id = redis.get(&Self::user_server_key(user_id)).await?;
        Ok(server_id.and_then(|s| s.parse().ok()))
    }

    /// Remove every session owned by `server_id` (the cleanup task's job
    /// once a node's heartbeat has expired). Returns the removed session ids
    /// so the caller can emit `session.lost`.
    pub async fn evict_server(&self, server_id: Uuid) -> Result<Vec<Uuid>> {
        let session_ids = self.list_server_sessions(server_id).await?;
        for id in &session_ids {
            if let Some(session) = self.get_session(*id).await? {
                self.unregister_session(&session).await?;
            }
        }
        let mut redis = self.redis.lock().await;
        redis.del(&Self::server_sessions_key(server_id)).await?;
        Ok(session_ids)
    }

    /// Migration protocol step: CAS the session's owner from `expected_old`
    /// to `new_server_id`. Returns `Conflict` if another node already moved
    /// it — the caller retries or aborts the migration.
    pub async fn migrate_owner(
        &self,
        session_id: Uuid,
        expected_old: Uuid,
        new_server_id: Uuid,
    ) -> Result<()> {
        let mut redis = self.redis.lock().await;
        let swapped = redis
            .cas(
                &Self::owner_key(session_id),
                &expected_old.to_string(),
                &new_server_id.to_string(),
            )
            .await?;
        if !swapped {
            return Err(Error::Conflict {
                reason: format!("session {} owner already changed", session_id),
            });
        }
        redis
            .hset_all(
                &Self::session_key(session_id),
                &[("owning_server_id", new_server_id.to_string())],
            )
            .await?;
        redis
            .srem(&Self::server_sessions_key(expected_old), &session_id.to_string())
            .await?;
        redis
            .sadd(
                &Self::server_sessions_key(new_server_id),
                &session_id.to_string(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(server_id: Uuid) -> Session {
        Session::new(Uuid::new_v4(), "user-1".into(), server_id, "web".into())
    }

    #[tokio::test]
    async fn register_then_find_by_user_and_server() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let manager = ConnectionManager::new(Arc::new(Mutex::new(client)));
            let server_id = Uuid::new_v4();
            let session = sample_session(server_id);

            manager.register_session(&session).await.unwrap();
            assert_eq!(
                manager.find_user_server(&session.user_id).await.unwrap(),
                Some(server_id)
            );
            assert!(manager
                .list_server_sessions(server_id)
                .await
                .unwrap()
                .contains(&session.id));

            manager.unregister_session(&session).await.unwrap();
            assert!(manager.get_session(session.id).await.unwrap().is_none());
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }

    #[tokio::test]
    async fn migrate_owner_fails_on_stale_expectation() {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            let client = RedisClient::new(&redis_url).await.unwrap();
            let manager = ConnectionManager::new(Arc::new(Mutex::new(client)));
            let old_server = Uuid::new_v4();
            let session = sample_session(old_server);
            manager.register_session(&session).await.unwrap();

            let wrong_expectation = Uuid::new_v4();
            let err = manager
                .migrate_owner(session.id, wrong_expectation, Uuid::new_v4())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Conflict { .. }));

            manager.unregister_session(&session).await.unwrap();
        } else {
            println!("skipping: REDIS_URL not set");
        }
    }
}
