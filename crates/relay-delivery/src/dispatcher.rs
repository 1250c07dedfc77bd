//! Consumes the event stream as a consumer group, evaluates every active
//! endpoint's filter once per event, and fans matching events out to
//! per-endpoint queues. One dispatcher task per known channel; workers are
//! spawned lazily the first time an endpoint has a job to receive.

use dashmap::DashMap;
use relay_common::metrics::DELIVERY_BACKPRESSURE_TOTAL;
use relay_common::redis_client::RedisClient;
use relay_domain::audit::AuditSeverity;
use relay_domain::AuditRecord;
use relay_event_stream::EventStream;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::EndpointCache;
use crate::circuit_breaker::CircuitBreakerManager;
use crate::worker::{DeliveryJob, DeliveryWorker};

pub type AuditSink = mpsc::UnboundedSender<AuditRecord>;

pub struct Dispatcher {
    event_stream: Arc<EventStream>,
    cache: Arc<EndpointCache>,
    redis: Arc<Mutex<RedisClient>>,
    pool: PgPool,
    breaker: Arc<CircuitBreakerManager>,
    audit_sink: AuditSink,
    consumer_group: String,
    queue_depth_threshold: usize,
    queues: DashMap<Uuid, mpsc::Sender<DeliveryJob>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_stream: Arc<EventStream>,
        cache: Arc<EndpointCache>,
        redis: Arc<Mutex<RedisClient>>,
        pool: PgPool,
        breaker: Arc<CircuitBreakerManager>,
        audit_sink: AuditSink,
        consumer_group: String,
        queue_depth_threshold: usize,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_stream,
            cache,
            redis,
            pool,
            breaker,
            audit_sink,
            consumer_group,
            queue_depth_threshold,
            queues: DashMap::new(),
            shutdown_tx,
        })
    }

    /// Discover channels via the event stream's known-channel set and spawn
    /// one consumer task per channel not already covered. Runs until the
    /// dispatcher's shutdown broadcast fires.
    pub async fn run(self: Arc<Self>, consumer_name: String, block_ms: u64, poll_interval: Duration) {
        let mut covered: HashSet<String> = HashSet::new();
        let mut ticker = tokio::time::interval(poll_interval);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let channels = match self.event_stream.known_channels().await {
                        Ok(channels) => channels,
                        Err(e) => {
                            warn!(error = %e, "failed to list known channels");
                            continue;
                        }
                    };
                    for channel in channels {
                        if covered.insert(channel.clone()) {
                            info!(channel, "dispatcher: starting consumer for newly discovered channel");
                            let dispatcher = self.clone();
                            let consumer_name = consumer_name.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(dispatcher.consume_channel(channel, consumer_name, block_ms, shutdown_rx));
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    async fn consume_channel(
        self: Arc<Self>,
        channel: String,
        consumer_name: String,
        block_ms: u64,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let org_id = org_id_from_channel(&channel).unwrap_or(Uuid::nil());
        if let Err(e) = self.event_stream.ensure_group(org_id, &channel, &self.consumer_group).await {
            warn!(channel, error = %e, "failed to create consumer group");
            return;
        }

        loop {
            tokio::select! {
                result = self.event_stream.consume(org_id, &channel, &self.consumer_group, &consumer_name, block_ms, 100) => {
                    match result {
                        Ok(events) => {
                            for event in events {
                                self.fan_out(&event).await;
                                if let Err(e) = self
                                    .event_stream
                                    .ack(org_id, &channel, &self.consumer_group, &event.id)
                                    .await
                                {
                                    warn!(event_id = %event.id, error = %e, "failed to ack event");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(channel, error = %e, "stream consume failed, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    async fn fan_out(&self, event: &relay_domain::Event) {
        for endpoint in self.cache.active() {
            if endpoint.org_id != event.org_id {
                continue;
            }
            if !endpoint.filter.matches(event) {
                continue;
            }

            let sender = self.queue_for(endpoint.id);
            let job = DeliveryJob { event: event.clone() };
            match sender.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    DELIVERY_BACKPRESSURE_TOTAL
                        .with_label_values(&[&endpoint.id.to_string()])
                        .inc();
                    let record = AuditRecord::new(
                        endpoint.org_id,
                        "relay-delivery",
                        "backpressure",
                        endpoint.id.to_string(),
                        AuditSeverity::Warning,
                    );
                    let _ = self.audit_sink.send(record);
                    warn!(endpoint_id = %endpoint.id, "delivery queue full, shedding event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(endpoint_id = %endpoint.id, "delivery worker gone, dropping queue entry");
                    self.queues.remove(&endpoint.id);
                }
            }
        }
    }

    /// Returns the endpoint's queue sender, spawning its worker on first use.
    fn queue_for(&self, endpoint_id: Uuid) -> mpsc::Sender<DeliveryJob> {
        if let Some(sender) = self.queues.get(&endpoint_id) {
            return sender.clone();
        }

        let (tx, rx) = mpsc::channel(self.queue_depth_threshold);
        self.queues.insert(endpoint_id, tx.clone());

        let cache = self.cache.clone();
        let worker = DeliveryWorker::new(
            endpoint_id,
            self.redis.clone(),
            self.pool.clone(),
            self.breaker.clone(),
            self.audit_sink.clone(),
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            worker.run(rx, move |id| cache.get(id), shutdown_rx).await;
        });

        tx
    }
}

/// Channels are scoped `org:{org_id}:suffix`; the stream API needs the org id
/// split back out even though the channel string already carries it.
fn org_id_from_channel(channel: &str) -> Option<Uuid> {
    channel.strip_prefix("org:")?.split(':').next()?.parse().ok()
}
