//! Shared Prometheus metrics, rendered on each service's `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        opts!("relay_connections_active", "Live client connections on this node"),
        &["server_id"]
    )
    .expect("metric can be created");

    pub static ref FRAMES_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_frames_processed_total", "Frames processed by type and outcome"),
        &["frame_type", "outcome"]
    )
    .expect("metric can be created");

    pub static ref RATE_LIMIT_TRIPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_rate_limit_trips_total", "Rate limit rejections by layer"),
        &["layer"]
    )
    .expect("metric can be created");

    pub static ref QUOTA_TRIPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_quota_trips_total", "Quota rejections by quota name"),
        &["quota"]
    )
    .expect("metric can be created");

    pub static ref EVENTS_APPENDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_events_appended_total", "Events appended to the stream"),
        &["org_id"]
    )
    .expect("metric can be created");

    pub static ref ROUTER_MESSAGES_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_router_messages_dropped_total", "Router envelopes dropped by reason"),
        &["reason"]
    )
    .expect("metric can be created");

    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_delivery_attempts_total", "Webhook delivery attempts"),
        &["endpoint_id", "success"]
    )
    .expect("metric can be created");

    pub static ref DELIVERY_DURATION: HistogramVec = register_histogram_vec!(
        "relay_delivery_duration_seconds",
        "Webhook delivery attempt duration",
        &["endpoint_id"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be created");

    pub static ref DELIVERY_QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        opts!("relay_delivery_queue_depth", "Current per-endpoint delivery queue depth"),
        &["endpoint_id"]
    )
    .expect("metric can be created");

    pub static ref DELIVERY_BACKPRESSURE_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_delivery_backpressure_total", "Deliveries shed due to queue backpressure"),
        &["endpoint_id"]
    )
    .expect("metric can be created");
}

/// Render the global Prometheus registry as text, for a `/metrics` route.
pub fn render() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
