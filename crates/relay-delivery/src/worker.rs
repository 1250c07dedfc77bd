//! One worker per endpoint: drains that endpoint's queue in event-id order,
//! owns its retry loop, and is the only writer of that endpoint's
//! `DeliveryReceipt` rows and exactly-once marker.

use relay_common::metrics::{DELIVERY_ATTEMPTS_TOTAL, DELIVERY_DURATION, DELIVERY_QUEUE_DEPTH};
use relay_common::redis_client::RedisClient;
use relay_domain::{AuditRecord, DeliveryEndpoint, DeliveryReceipt, DeliverySemantics, Event, ReceiptStatus};
use relay_domain::audit::AuditSeverity;
use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerManager;
use crate::delivery::{exactly_once_key, WebhookDelivery};

/// Long enough to outlive any sane event retention window; a "done" marker
/// only needs to survive as long as a duplicate redelivery could still show
/// up (stream reclaim, retried dispatch), not forever.
const EXACTLY_ONCE_DONE_TTL_SECS: u64 = 7 * 24 * 3600;

pub struct DeliveryJob {
    pub event: Event,
}

enum MarkerState {
    Claimed,
    AlreadyDone,
    InFlightElsewhere,
}

pub struct DeliveryWorker {
    endpoint_id: Uuid,
    redis: Arc<Mutex<RedisClient>>,
    pool: PgPool,
    delivery: WebhookDelivery,
    breaker: Arc<CircuitBreakerManager>,
    audit_sink: crate::dispatcher::AuditSink,
}

impl DeliveryWorker {
    pub fn new(
        endpoint_id: Uuid,
        redis: Arc<Mutex<RedisClient>>,
        pool: PgPool,
        breaker: Arc<CircuitBreakerManager>,
        audit_sink: crate::dispatcher::AuditSink,
    ) -> Self {
        Self {
            endpoint_id,
            redis,
            pool,
            delivery: WebhookDelivery::new(),
            breaker,
            audit_sink,
        }
    }

    pub async fn run(
        mut self,
        mut jobs: mpsc::Receiver<DeliveryJob>,
        endpoint_lookup: impl Fn(Uuid) -> Option<DeliveryEndpoint>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        loop {
            let job = tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = shutdown.recv() => {
                    info!(endpoint_id = %self.endpoint_id, "delivery worker shutting down");
                    break;
                }
            };

            DELIVERY_QUEUE_DEPTH
                .with_label_values(&[&self.endpoint_id.to_string()])
                .set(jobs.len() as i64);

            let Some(endpoint) = endpoint_lookup(self.endpoint_id) else {
                warn!(endpoint_id = %self.endpoint_id, "endpoint disappeared from cache, dropping job");
                continue;
            };

            self.process(&endpoint, job.event).await;
        }
    }

    /// Drive one event through to a terminal receipt, retrying in place
    /// (rather than re-queueing) so later events for the same endpoint wait
    /// behind it, preserving per-endpoint event-id ordering.
    async fn process(&mut self, endpoint: &DeliveryEndpoint, event: Event) {
        let at_most_once = endpoint.semantics == DeliverySemantics::AtMostOnce;
        let exactly_once = endpoint.semantics == DeliverySemantics::ExactlyOnce;
        let marker_key = exactly_once_key(&event.id, endpoint.id);

        if exactly_once {
            match self.claim_marker(&marker_key, endpoint.timeout_secs as u64).await {
                MarkerState::AlreadyDone => {
                    info!(event_id = %event.id, endpoint_id = %endpoint.id, "exactly-once: already delivered, skipping");
                    return;
                }
                MarkerState::InFlightElsewhere => {
                    warn!(event_id = %event.id, endpoint_id = %endpoint.id, "exactly-once marker in-flight elsewhere, deferring");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                MarkerState::Claimed => {}
            }
        }

        let mut receipt = DeliveryReceipt::new_pending(event.id.clone(), endpoint.id);

        // Persist the pending row before the first HTTP attempt, not after:
        // a crash between claiming the exactly-once marker and writing the
        // receipt must still leave something for the reconciliation sweep to
        // find, or the event vanishes with no row and no way to recover it.
        if let Err(e) = self.persist_receipt(&receipt).await {
            warn!(error = %e, "failed to persist initial pending receipt");
        }

        loop {
            while !self.breaker.should_allow_request(endpoint.id) {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let attempt = (receipt.attempts + 1) as u32;
            let outcome = self.delivery.deliver(endpoint, &event, receipt.id, attempt).await;

            DELIVERY_ATTEMPTS_TOTAL
                .with_label_values(&[&endpoint.id.to_string(), &outcome.succeeded.to_string()])
                .inc();
            DELIVERY_DURATION
                .with_label_values(&[&endpoint.id.to_string()])
                .observe(outcome.duration_ms as f64 / 1000.0);

            if outcome.succeeded {
                self.breaker.record_success(endpoint.id);
            } else {
                self.breaker.record_failure(endpoint.id);
            }

            receipt.record_attempt(
                outcome.succeeded,
                outcome.status_code,
                Some(outcome.duration_ms),
                outcome.error_message.clone(),
                endpoint.max_retries,
                at_most_once,
                endpoint.is_active,
            );

            if let Err(e) = self.persist_receipt(&receipt).await {
                warn!(error = %e, "failed to persist delivery receipt");
            }

            match receipt.status {
                ReceiptStatus::Succeeded => {
                    if exactly_once {
                        self.finish_marker(&marker_key, true).await;
                    }
                    break;
                }
                ReceiptStatus::Dead => {
                    if exactly_once {
                        self.finish_marker(&marker_key, false).await;
                    }
                    self.audit_dead(endpoint, &event);
                    break;
                }
                ReceiptStatus::Pending => {
                    if exactly_once {
                        self.finish_marker(&marker_key, false).await;
                    }
                    let jitter_factor = if endpoint.jitter {
                        rand::thread_rng().gen_range(0.5..1.5)
                    } else {
                        1.0
                    };
                    let delay = endpoint.backoff_delay(attempt, jitter_factor);
                    tokio::time::sleep(delay).await;
                    if exactly_once {
                        match self.claim_marker(&marker_key, endpoint.timeout_secs as u64).await {
                            MarkerState::AlreadyDone => break,
                            _ => {}
                        }
                    }
                    continue;
                }
                ReceiptStatus::Failed => unreachable!("record_attempt never produces Failed"),
            }
        }
    }

    async fn claim_marker(&self, key: &str, timeout_secs: u64) -> MarkerState {
        let mut redis = self.redis.lock().await;
        match redis.set_nx_ex(key, "in-flight", timeout_secs).await {
            Ok(true) => MarkerState::Claimed,
            Ok(false) => match redis.get(key).await {
                Ok(Some(v)) if v == "done" => MarkerState::AlreadyDone,
                _ => MarkerState::InFlightElsewhere,
            },
            Err(e) => {
                warn!(error = %e, "exactly-once marker claim failed, proceeding without it");
                MarkerState::Claimed
            }
        }
    }

    async fn finish_marker(&self, key: &str, succeeded: bool) {
        let mut redis = self.redis.lock().await;
        let result = if succeeded {
            redis.set_ex(key, "done", EXACTLY_ONCE_DONE_TTL_SECS).await
        } else {
            redis.del(key).await
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to update exactly-once marker");
        }
    }

    async fn persist_receipt(&self, receipt: &DeliveryReceipt) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO delivery_receipts
                (id, event_id, endpoint_id, status, attempts, first_attempt_at, last_attempt_at,
                 response_code, response_time_ms, error, reconciled)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (event_id, endpoint_id) DO UPDATE SET
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                last_attempt_at = EXCLUDED.last_attempt_at,
                response_code = EXCLUDED.response_code,
                response_time_ms = EXCLUDED.response_time_ms,
                error = EXCLUDED.error,
                reconciled = EXCLUDED.reconciled",
        )
        .bind(receipt.id)
        .bind(&receipt.event_id)
        .bind(receipt.endpoint_id)
        .bind(receipt.status)
        .bind(receipt.attempts)
        .bind(receipt.first_attempt_at)
        .bind(receipt.last_attempt_at)
        .bind(receipt.response_code)
        .bind(receipt.response_time_ms)
        .bind(&receipt.error)
        .bind(receipt.reconciled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn audit_dead(&self, endpoint: &DeliveryEndpoint, event: &Event) {
        let record = AuditRecord::new(
            endpoint.org_id,
            "relay-delivery",
            "delivery_dead",
            format!("{}:{}", endpoint.id, event.id),
            AuditSeverity::Warning,
        );
        if self.audit_sink.send(record).is_err() {
            warn!("audit sink closed, dropping delivery_dead record");
        }
    }
}
