//! In-memory hot-path cache of active delivery endpoints, refreshed from
//! Postgres on an interval so the dispatcher never queries the database on
//! the event-matching path.

use dashmap::DashMap;
use relay_domain::DeliveryEndpoint;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct EndpointCache {
    endpoints: DashMap<Uuid, DeliveryEndpoint>,
}

impl EndpointCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
        })
    }

    pub fn get(&self, id: Uuid) -> Option<DeliveryEndpoint> {
        self.endpoints.get(&id).map(|e| e.value().clone())
    }

    /// A snapshot of every active, non-failed endpoint — the set the
    /// dispatcher evaluates each event's filter against.
    pub fn active(&self) -> Vec<DeliveryEndpoint> {
        self.endpoints
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| e.is_active)
            .collect()
    }

    pub fn update(&self, endpoint: DeliveryEndpoint) {
        self.endpoints.insert(endpoint.id, endpoint);
    }

    async fn refresh(&self, pool: &PgPool) -> sqlx::Result<()> {
        debug!("refreshing delivery endpoint cache");
        let endpoints: Vec<DeliveryEndpoint> = sqlx::query_as(
            "SELECT id, org_id, name, url, method, headers, secret, filter, semantics,
                    backoff_strategy, base_delay_secs, max_delay_secs, max_retries, jitter,
                    timeout_secs, is_active, health_status, consecutive_failures,
                    last_successful_delivery_at, created_at, updated_at
             FROM delivery_endpoints
             WHERE is_active = true",
        )
        .fetch_all(pool)
        .await?;

        let seen: std::collections::HashSet<Uuid> = endpoints.iter().map(|e| e.id).collect();
        self.endpoints.retain(|id, _| seen.contains(id));
        for endpoint in endpoints {
            self.endpoints.insert(endpoint.id, endpoint);
        }
        info!(count = self.endpoints.len(), "endpoint cache refreshed");
        Ok(())
    }

    /// Load once at startup, then keep refreshing on `interval` until
    /// `shutdown` fires.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        pool: PgPool,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        if let Err(e) = self.refresh(&pool).await {
            error!(error = %e, "initial endpoint cache load failed");
        }

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh(&pool).await {
                        error!(error = %e, "endpoint cache refresh failed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
