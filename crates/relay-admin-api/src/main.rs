mod auth;
mod handlers;
mod state;

use axum::routing::{get, post};
use axum::Router;
use relay_config::Config;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_common::logging::init_from_env();
    let config = Config::load()?;

    let pool = relay_common::db::create_pool(&config.database_url, 10).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let state = AppState {
        pool,
        jwt_secret: config.auth.jwt_secret.clone(),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/webhooks",
            post(handlers::endpoints::create_endpoint).get(handlers::endpoints::list_endpoints),
        )
        .route(
            "/webhooks/{id}",
            get(handlers::endpoints::get_endpoint)
                .put(handlers::endpoints::update_endpoint)
                .delete(handlers::endpoints::delete_endpoint),
        )
        .route(
            "/webhooks/{id}/regenerate-secret",
            post(handlers::endpoints::regenerate_hmac_secret),
        )
        .route("/webhooks/{id}/deliveries", get(handlers::endpoints::list_deliveries))
        .route("/webhooks/templates", get(handlers::templates::list_templates))
        .route("/webhooks/templates/{id}", get(handlers::templates::get_template))
        .route(
            "/webhooks/from-template/{id}",
            post(handlers::templates::from_template),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state);

    let port: u16 = std::env::var("ADMIN_API_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8090);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "relay-admin-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
