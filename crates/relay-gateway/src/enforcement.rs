//! Tenant Enforcement (§4.5): the per-frame pipeline every inbound frame
//! passes through before it is allowed to touch the event stream or the
//! router. Identity extraction happens one layer up (it produces the
//! `IdentityContext` this module receives); everything from channel
//! authorization onward lives here.

use relay_common::error::{Error, Result};
use relay_common::redis_client::RedisClient;
use relay_config::RateLimitConfig;
use relay_domain::{AuditRecord, Channel};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// In-process sliding window for one connection's per-connection rate limit.
/// Owned by the socket's task, never shared — no locking needed beyond the
/// `Mutex` that guards mutation from the single task that drives the socket.
pub struct ConnectionRateLimiter {
    window: std::time::Duration,
    max: u32,
    timestamps: VecDeque<std::time::Instant>,
}

impl ConnectionRateLimiter {
    pub fn new(window_secs: u64, max: u32) -> Self {
        Self {
            window: std::time::Duration::from_secs(window_secs),
            max,
            timestamps: VecDeque::new(),
        }
    }

    /// Record one frame and report whether the connection is still within
    /// its window budget.
    pub fn check(&mut self) -> bool {
        let now = std::time::Instant::now();
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if self.timestamps.len() as u32 >= self.max {
            return false;
        }
        self.timestamps.push_back(now);
        true
    }
}

pub struct TenantRateLimiter {
    redis: Arc<Mutex<RedisClient>>,
    config: RateLimitConfig,
}

impl TenantRateLimiter {
    pub fn new(redis: Arc<Mutex<RedisClient>>, config: RateLimitConfig) -> Self {
        Self { redis, config }
    }

    /// Two distributed counters, burst checked first because it is the more
    /// restrictive of the two. Fails open (returns `Ok(true)`, logging a
    /// warning) if the substrate is unreachable — disconnecting every
    /// tenant on a transient KV outage is worse than a brief soft limit.
    pub async fn check(&self, org_id: Uuid) -> bool {
        let burst_bucket = bucket(self.config.per_tenant_burst_window_secs);
        let window_bucket = bucket(self.config.per_tenant_window_secs);
        let burst_key = format!("tenant:{}:burst:{}", org_id, burst_bucket);
        let window_key = format!("tenant:{}:msgs:{}", org_id, window_bucket);

        let mut redis = self.redis.lock().await;
        let burst_ttl = (self.config.per_tenant_burst_window_secs * 2) as i64;
        let window_ttl = (self.config.per_tenant_window_secs * 2) as i64;

        let burst_count = match redis.incr_with_ttl(&burst_key, burst_ttl).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%org_id, error = %e, "tenant rate limiter unreachable, failing open");
                return true;
            }
        };
        if burst_count > self.config.per_tenant_burst_max() as i64 {
            return false;
        }

        let window_count = match redis.incr_with_ttl(&window_key, window_ttl).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%org_id, error = %e, "tenant rate limiter unreachable, failing open");
                return true;
            }
        };
        window_count <= self.config.per_tenant_max as i64
    }
}

fn bucket(window_secs: u64) -> i64 {
    let now = chrono::Utc::now().timestamp();
    now / window_secs.max(1) as i64
}

pub struct QuotaEnforcer {
    redis: Arc<Mutex<RedisClient>>,
}

impl QuotaEnforcer {
    pub fn new(redis: Arc<Mutex<RedisClient>>) -> Self {
        Self { redis }
    }

    pub async fn check_event_quota(&self, org_id: Uuid, max_events_per_hour: i64) -> Result<()> {
        let key = format!("quota:events:{}", org_id);
        let count = self.redis.lock().await.incr_with_ttl(&key, 3600).await?;
        if count > max_events_per_hour {
            return Err(Error::QuotaExceeded {
                quota: "max_events_per_hour".into(),
            });
        }
        Ok(())
    }

    pub async fn check_api_call_quota(&self, org_id: Uuid, max_api_calls_per_hour: i64) -> Result<()> {
        let key = format!("quota:api_calls:{}", org_id);
        let count = self.redis.lock().await.incr_with_ttl(&key, 3600).await?;
        if count > max_api_calls_per_hour {
            return Err(Error::QuotaExceeded {
                quota: "max_api_calls_per_hour".into(),
            });
        }
        Ok(())
    }
}

/// Authorize a channel string against the caller's org, mapping the parse
/// error onto the taxonomy's `Forbidden`/`Invalid` split.
pub fn authorize_channel(raw: &str, own_org_id: Uuid) -> Result<Channel> {
    Channel::parse_scoped(raw, own_org_id).map_err(|e| match e {
        relay_domain::channel::ChannelParseError::BadFormat => Error::Invalid {
            reason: e.to_string(),
        },
        relay_domain::channel::ChannelParseError::WrongOrg { .. } => Error::Forbidden {
            reason: e.to_string(),
        },
    })
}

/// Append an audit record via whatever persistent-store collaborator the
/// caller supplies; sent through a channel so enforcement never blocks on
/// the audit sink being slow.
pub type AuditSink = tokio::sync::mpsc::UnboundedSender<AuditRecord>;

pub fn audit(sink: &AuditSink, record: AuditRecord) {
    if sink.send(record).is_err() {
        warn!("audit sink closed, dropping audit record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_limiter_trips_after_max() {
        let mut limiter = ConnectionRateLimiter::new(60, 2);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn authorize_channel_rejects_cross_tenant() {
        let org = Uuid::new_v4();
        let other = Uuid::new_v4();
        let raw = format!("org:{}:chat", other);
        let err = authorize_channel(&raw, org).unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[test]
    fn authorize_channel_rejects_malformed() {
        let org = Uuid::new_v4();
        let err = authorize_channel("chat", org).unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }
}
