use axum::routing::get;
use axum::Router as AxumRouter;
use relay_common::redis_client::RedisClient;
use relay_config::Config;
use relay_delivery::{CircuitBreakerManager, Dispatcher, EndpointCache, Reconciler};
use relay_event_stream::EventStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

const ENDPOINT_CACHE_REFRESH_SECS: u64 = 15;
const RECONCILIATION_INTERVAL_SECS: u64 = 60;
const CHANNEL_DISCOVERY_POLL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_common::logging::init_from_env();
    let config = Config::load()?;

    let pool = relay_common::db::create_pool(&config.database_url, 20).await?;
    let redis = Arc::new(Mutex::new(RedisClient::new(&config.substrate.url).await?));

    let event_stream = Arc::new(EventStream::new(redis.clone(), config.stream.max_length));
    let cache = EndpointCache::new();
    let breaker = Arc::new(CircuitBreakerManager::new(5, Duration::from_secs(30)));

    let (audit_tx, mut audit_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(record) = audit_rx.recv().await {
            info!(org_id = %record.org_id, action = %record.action, resource = %record.resource, "audit");
        }
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    tokio::spawn(cache.clone().run_refresh_loop(
        pool.clone(),
        Duration::from_secs(ENDPOINT_CACHE_REFRESH_SECS),
        shutdown_tx.subscribe(),
    ));

    let dispatcher = Dispatcher::new(
        event_stream.clone(),
        cache.clone(),
        redis.clone(),
        pool.clone(),
        breaker.clone(),
        audit_tx.clone(),
        config.stream.consumer_group.clone(),
        config.delivery.queue_depth_threshold,
        shutdown_tx.clone(),
    );

    let consumer_name = format!("delivery-{}", uuid::Uuid::new_v4());
    tokio::spawn(dispatcher.run(
        consumer_name,
        config.stream.block_ms,
        Duration::from_secs(CHANNEL_DISCOVERY_POLL_SECS),
    ));

    let reconciler = Reconciler::new(redis.clone(), pool.clone());
    tokio::spawn(reconciler.run(
        Duration::from_secs(RECONCILIATION_INTERVAL_SECS),
        shutdown_tx.subscribe(),
    ));

    let app = AxumRouter::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.delivery.metrics_port)).await?;
    info!(port = config.delivery.metrics_port, "relay-delivery listening");

    let shutdown_signal = {
        let shutdown_tx = shutdown_tx.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

async fn metrics_handler() -> String {
    relay_common::metrics::render().unwrap_or_else(|e| {
        warn!(error = %e, "failed to render metrics");
        format!("# metrics render failed: {e}")
    })
}
