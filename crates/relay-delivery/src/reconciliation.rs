//! Background sweep that resolves exactly-once receipts stuck `pending` past
//! their marker's TTL — the crash-recovery counterpart to the worker's
//! in-line retry loop, covering the case where a worker died mid-attempt.

use relay_common::redis_client::RedisClient;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::delivery::exactly_once_key;

/// Default grace period: only reconcile receipts idle at least this long, so
/// an attempt still legitimately in flight is never touched.
const DEFAULT_STALE_GRACE_SECS: i64 = 300;

pub struct Reconciler {
    redis: Arc<Mutex<RedisClient>>,
    pool: PgPool,
    grace_secs: i64,
}

impl Reconciler {
    pub fn new(redis: Arc<Mutex<RedisClient>>, pool: PgPool) -> Self {
        Self {
            redis,
            pool,
            grace_secs: DEFAULT_STALE_GRACE_SECS,
        }
    }

    /// Same as `new`, with a non-default grace period — used by tests that
    /// can't wait out the production grace window.
    pub fn with_grace_secs(redis: Arc<Mutex<RedisClient>>, pool: PgPool, grace_secs: i64) -> Self {
        Self { redis, pool, grace_secs }
    }

    /// Run one sweep pass. Exposed (not just called from `run`'s loop) so a
    /// test can simulate a crashed worker and assert on the sweep's outcome
    /// directly instead of waiting on the interval.
    pub async fn sweep(&self) -> sqlx::Result<usize> {
        let rows: Vec<(String, uuid::Uuid)> = sqlx::query_as(
            "SELECT event_id, endpoint_id FROM delivery_receipts
             WHERE status = 'pending' AND reconciled = false
               AND last_attempt_at < NOW() - ($1 || ' seconds')::interval",
        )
        .bind(self.grace_secs.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut resolved = 0;
        for (event_id, endpoint_id) in rows {
            let key = exactly_once_key(&event_id, endpoint_id);
            let marker = self.redis.lock().await.get(&key).await.ok().flatten();

            let new_status = match marker.as_deref() {
                Some("done") => "succeeded",
                // No marker at all: the in-flight claim expired without a
                // result ever being recorded, so the attempt never completed
                // and this event is eligible for a fresh delivery attempt.
                None => "failed",
                // Still claimed in-flight: genuinely not stale yet by our
                // definition, leave it for the next sweep.
                Some(_) => continue,
            };

            sqlx::query(
                "UPDATE delivery_receipts SET status = $1, reconciled = true
                 WHERE event_id = $2 AND endpoint_id = $3",
            )
            .bind(new_status)
            .bind(&event_id)
            .bind(endpoint_id)
            .execute(&self.pool)
            .await?;
            resolved += 1;
        }
        Ok(resolved)
    }

    pub async fn run(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(n) => info!(resolved = n, "reconciliation sweep resolved stuck receipts"),
                        Err(e) => warn!(error = %e, "reconciliation sweep failed"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
