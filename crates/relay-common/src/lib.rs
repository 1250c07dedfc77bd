//! # Relay Common Library
//!
//! Shared infrastructure used by every relay service: database pooling,
//! the KV/pubsub substrate client, typed errors, identity verification, and
//! structured logging.

pub mod auth;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod redis_client;

pub use auth::{hash_password, sign_hmac, verify_hmac, verify_jwt, verify_password, IdentityContext};
pub use db::create_pool;
pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_json};
pub use redis_client::RedisClient;
