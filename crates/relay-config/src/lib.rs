//! Environment-driven configuration for every relay service.
//!
//! Each binary loads the `Config` sections it needs rather than the whole
//! struct — the gateway never touches `DeliveryConfig`, the delivery engine
//! never touches `TransportConfig`.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportConfig,
    pub rate_limits: RateLimitConfig,
    pub stream: StreamConfig,
    pub substrate: SubstrateConfig,
    pub auth: AuthConfig,
    pub tenant_defaults: TenantDefaultsConfig,
    pub delivery: DeliveryConfig,
    pub database_url: String,
}

/// Client-facing transport settings (the gateway's listener).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub port: u16,
    pub path: String,
    pub cors_origin: String,
    pub max_payload_bytes: usize,
    pub idle_timeout_secs: u64,
}

/// Two-layer rate limiting, per §4.5 item 4.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_connection_window_secs: u64,
    pub per_connection_max: u32,
    pub per_tenant_window_secs: u64,
    pub per_tenant_max: u32,
    pub per_tenant_burst_window_secs: u64,
}

impl RateLimitConfig {
    /// `ceil(per-minute / 6)`, the default burst limit derivation in §4.5.
    pub fn per_tenant_burst_max(&self) -> u32 {
        self.per_tenant_max.div_ceil(6)
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub max_length: usize,
    pub consumer_group: String,
    pub block_ms: u64,
    pub visibility_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SubstrateConfig {
    pub url: String,
    pub cluster: bool,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub clock_skew_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TenantDefaultsConfig {
    pub max_users: i32,
    pub max_connections: i32,
    pub max_events_per_hour: i32,
    pub max_channels: i32,
    pub max_storage_bytes: i64,
    pub max_api_calls_per_hour: i32,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub worker_pool_size: usize,
    pub queue_depth_threshold: usize,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub router_skew_secs: i64,
    pub metrics_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            transport: Self::load_transport()?,
            rate_limits: Self::load_rate_limits()?,
            stream: Self::load_stream()?,
            substrate: Self::load_substrate()?,
            auth: Self::load_auth()?,
            tenant_defaults: Self::load_tenant_defaults()?,
            delivery: Self::load_delivery()?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
        })
    }

    fn load_transport() -> Result<TransportConfig> {
        Ok(TransportConfig {
            port: env_or("GATEWAY_PORT", 8080)?,
            path: env::var("GATEWAY_WS_PATH").unwrap_or_else(|_| "/ws".to_string()),
            cors_origin: env::var("GATEWAY_CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            max_payload_bytes: env_or("GATEWAY_MAX_PAYLOAD_BYTES", 1_048_576)?,
            idle_timeout_secs: env_or("GATEWAY_IDLE_TIMEOUT_SECS", 120)?,
        })
    }

    fn load_rate_limits() -> Result<RateLimitConfig> {
        Ok(RateLimitConfig {
            per_connection_window_secs: env_or("RATE_LIMIT_CONNECTION_WINDOW_SECS", 60)?,
            per_connection_max: env_or("RATE_LIMIT_CONNECTION_MAX", 100)?,
            per_tenant_window_secs: env_or("RATE_LIMIT_TENANT_WINDOW_SECS", 60)?,
            per_tenant_max: env_or("RATE_LIMIT_TENANT_MAX", 100)?,
            per_tenant_burst_window_secs: env_or("RATE_LIMIT_TENANT_BURST_WINDOW_SECS", 10)?,
        })
    }

    fn load_stream() -> Result<StreamConfig> {
        Ok(StreamConfig {
            max_length: env_or("STREAM_MAX_LENGTH", 100_000)?,
            consumer_group: env::var("STREAM_CONSUMER_GROUP")
                .unwrap_or_else(|_| "delivery-engine".to_string()),
            block_ms: env_or("STREAM_BLOCK_MS", 5_000)?,
            visibility_timeout_ms: env_or("STREAM_VISIBILITY_TIMEOUT_MS", 30_000)?,
        })
    }

    fn load_substrate() -> Result<SubstrateConfig> {
        Ok(SubstrateConfig {
            url: env::var("SUBSTRATE_URL")
                .or_else(|_| env::var("REDIS_URL"))
                .context("SUBSTRATE_URL (or REDIS_URL) must be set")?,
            cluster: env::var("SUBSTRATE_CLUSTER")
                .map(|v| v == "true")
                .unwrap_or(false),
            key_prefix: env::var("SUBSTRATE_KEY_PREFIX").unwrap_or_else(|_| "relay".to_string()),
        })
    }

    fn load_auth() -> Result<AuthConfig> {
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters");
        }

        Ok(AuthConfig {
            jwt_secret,
            issuer: env::var("AUTH_ISSUER").unwrap_or_else(|_| "relay".to_string()),
            audience: env::var("AUTH_AUDIENCE").unwrap_or_else(|_| "relay-clients".to_string()),
            clock_skew_secs: env_or("AUTH_CLOCK_SKEW_SECS", 30)?,
        })
    }

    fn load_tenant_defaults() -> Result<TenantDefaultsConfig> {
        Ok(TenantDefaultsConfig {
            max_users: env_or("TENANT_DEFAULT_MAX_USERS", 100)?,
            max_connections: env_or("TENANT_DEFAULT_MAX_CONNECTIONS", 1_000)?,
            max_events_per_hour: env_or("TENANT_DEFAULT_MAX_EVENTS_PER_HOUR", 360_000)?,
            max_channels: env_or("TENANT_DEFAULT_MAX_CHANNELS", 1_000)?,
            max_storage_bytes: env_or("TENANT_DEFAULT_MAX_STORAGE_BYTES", 1_073_741_824i64)?,
            max_api_calls_per_hour: env_or("TENANT_DEFAULT_MAX_API_CALLS_PER_HOUR", 100_000)?,
        })
    }

    fn load_delivery() -> Result<DeliveryConfig> {
        Ok(DeliveryConfig {
            worker_pool_size: env_or("DELIVERY_WORKER_POOL_SIZE", 50)?,
            queue_depth_threshold: env_or("DELIVERY_QUEUE_DEPTH_THRESHOLD", 10_000)?,
            default_timeout_secs: env_or("DELIVERY_DEFAULT_TIMEOUT_SECS", 10)?,
            max_timeout_secs: env_or("DELIVERY_MAX_TIMEOUT_SECS", 60)?,
            router_skew_secs: env_or("ROUTER_MESSAGE_SKEW_SECS", 30i64)?,
            metrics_port: env_or("DELIVERY_METRICS_PORT", 9092)?,
        })
    }
}

/// Parse an env var with a default, the way the workspace consistently
/// handles "unwrap_or a sensible default" config fields.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a valid value: {}", name, e)),
        Err(_) => Ok(default),
    }
}

pub fn visibility_timeout(config: &StreamConfig) -> Duration {
    Duration::from_millis(config.visibility_timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_jwt_secret() {
        unsafe {
            env::set_var("JWT_SECRET", "short");
            env::set_var("DATABASE_URL", "postgresql://localhost/test");
            env::set_var("REDIS_URL", "redis://localhost");
        }

        let result = Config::load();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("32 characters"));
    }

    #[test]
    fn burst_max_is_ceil_of_per_minute_over_six() {
        let rl = RateLimitConfig {
            per_connection_window_secs: 60,
            per_connection_max: 100,
            per_tenant_window_secs: 60,
            per_tenant_max: 100,
            per_tenant_burst_window_secs: 10,
        };
        assert_eq!(rl.per_tenant_burst_max(), 17);
    }
}
