use axum::routing::get;
use axum::Router as AxumRouter;
use dashmap::DashMap;
use relay_common::redis_client::RedisClient;
use relay_config::Config;
use relay_domain::Server;
use relay_event_stream::EventStream;
use relay_registry::Registry;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use relay_gateway::enforcement::{QuotaEnforcer, TenantRateLimiter};
use relay_gateway::router::{self, Router};
use relay_gateway::session::ConnectionManager;
use relay_gateway::state::AppState;
use relay_gateway::handler;

const HEARTBEAT_TTL_SECS: u64 = 15;
const HEARTBEAT_INTERVAL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_common::logging::init_from_env();
    let config = Config::load()?;

    let server_id = Uuid::new_v4();
    let redis = Arc::new(Mutex::new(RedisClient::new(&config.substrate.url).await?));

    let registry = Arc::new(Registry::new(redis.clone(), HEARTBEAT_TTL_SECS));
    let connections = Arc::new(ConnectionManager::new(redis.clone()));
    let event_stream = Arc::new(EventStream::new(redis.clone(), config.stream.max_length));
    let local_sockets: router::LocalSockets = Arc::new(DashMap::new());
    let router = Arc::new(Router::new(
        server_id,
        redis.clone(),
        local_sockets.clone(),
        config.delivery.router_skew_secs,
    ));
    let tenant_rate_limiter = Arc::new(TenantRateLimiter::new(redis.clone(), config.rate_limits.clone()));
    let quota = Arc::new(QuotaEnforcer::new(redis.clone()));

    let (audit_tx, mut audit_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(record) = audit_rx.recv().await {
            info!(org_id = %record.org_id, action = %record.action, resource = %record.resource, "audit");
        }
    });

    let app_state = AppState {
        server_id,
        connections: connections.clone(),
        router: router.clone(),
        event_stream,
        tenant_rate_limiter,
        quota,
        local_sockets: local_sockets.clone(),
        audit_sink: audit_tx,
        auth_config: Arc::new(config.auth.clone()),
        rate_limits: Arc::new(config.rate_limits.clone()),
        tenant_defaults: Arc::new(config.tenant_defaults.clone()),
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let server_record = Arc::new(Mutex::new(Server {
        id: server_id,
        host: "0.0.0.0".into(),
        port: config.transport.port,
        protocol: "ws".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        connection_count: 0,
        cpu_percent: 0.0,
        mem_percent: 0.0,
        started_at: chrono::Utc::now(),
        last_heartbeat: chrono::Utc::now(),
    }));

    tokio::spawn(registry.clone().run_heartbeat_loop(
        server_record,
        std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        shutdown_tx.subscribe(),
    ));

    tokio::spawn({
        let router = router.clone();
        let redis_url = config.substrate.url.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            if let Err(e) = router.run_subscriber(redis_url, shutdown_rx).await {
                warn!(error = %e, "router subscriber exited");
            }
        }
    });

    tokio::spawn(run_stale_server_sweep(
        registry.clone(),
        connections.clone(),
        std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS * 3),
        shutdown_tx.subscribe(),
    ));

    let app = AxumRouter::new()
        .route("/ws", get(handler::ws_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.transport.port)).await?;
    info!(port = config.transport.port, %server_id, "relay-gateway listening");

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

    registry.deregister(server_id).await?;
    Ok(())
}

async fn metrics_handler() -> String {
    relay_common::metrics::render().unwrap_or_else(|e| format!("# metrics render failed: {e}"))
}

/// Periodically diff the registry's known-server set against its previous
/// scan; any id that disappeared had its heartbeat expire, so its sessions
/// are evicted and a `session.lost` line is emitted.
async fn run_stale_server_sweep(
    registry: Arc<Registry>,
    connections: Arc<ConnectionManager>,
    interval: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut known: HashSet<Uuid> = HashSet::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let active = match registry.active_servers().await {
                    Ok(servers) => servers.into_iter().map(|s| s.id).collect::<HashSet<_>>(),
                    Err(e) => {
                        warn!(error = %e, "registry scan failed");
                        continue;
                    }
                };
                for lost_id in known.difference(&active) {
                    match connections.evict_server(*lost_id).await {
                        Ok(sessions) => {
                            warn!(server_id = %lost_id, evicted = sessions.len(), "session.lost: server heartbeat expired");
                        }
                        Err(e) => warn!(server_id = %lost_id, error = %e, "failed to evict sessions for lost server"),
                    }
                }
                known = active;
            }
            _ = shutdown.recv() => break,
        }
    }
}
