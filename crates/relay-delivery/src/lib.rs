//! Delivery Guarantee Engine: consumes the event stream, fans matching
//! events out to per-endpoint queues, and drives each webhook delivery
//! through its retry/backoff/circuit-breaker lifecycle to a terminal
//! `DeliveryReceipt`. Also hosts the Webhook Template Layer used by the
//! admin API's `from-template` endpoint.

pub mod cache;
pub mod circuit_breaker;
pub mod delivery;
pub mod dispatcher;
pub mod reconciliation;
pub mod signature;
pub mod templates;
pub mod worker;

pub use cache::EndpointCache;
pub use circuit_breaker::CircuitBreakerManager;
pub use delivery::WebhookDelivery;
pub use dispatcher::Dispatcher;
pub use reconciliation::Reconciler;
