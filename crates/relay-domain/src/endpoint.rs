use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::filter::FilterPredicate;

/// A webhook destination, carrying both its retry policy and a health
/// tracker (mapped onto a circuit breaker by the delivery engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DeliveryEndpoint {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub url: String,
    pub method: String,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub headers: serde_json::Value,
    pub secret: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub filter: FilterPredicate,
    pub semantics: DeliverySemantics,
    pub backoff_strategy: BackoffStrategy,
    pub base_delay_secs: i32,
    pub max_delay_secs: i32,
    pub max_retries: i32,
    pub jitter: bool,
    pub timeout_secs: i32,
    pub is_active: bool,
    pub health_status: HealthStatus,
    pub consecutive_failures: i32,
    pub last_successful_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "VARCHAR", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "VARCHAR", rename_all = "kebab-case"))]
#[serde(rename_all = "kebab-case")]
pub enum DeliverySemantics {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "VARCHAR", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Validate, Deserialize)]
pub struct CreateEndpointRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(url)]
    pub url: String,

    #[validate(length(min = 1, max = 10))]
    pub method: Option<String>,

    pub secret: Option<String>,

    pub filter: Option<FilterPredicate>,

    pub semantics: Option<DeliverySemantics>,

    pub backoff_strategy: Option<BackoffStrategy>,

    #[validate(range(min = 1, max = 3600))]
    pub base_delay_secs: Option<i32>,

    #[validate(range(min = 1, max = 3600))]
    pub max_delay_secs: Option<i32>,

    #[validate(range(min = 0, max = 20))]
    pub max_retries: Option<i32>,

    #[validate(range(min = 1, max = 60))]
    pub timeout_secs: Option<i32>,
}

#[derive(Debug, Validate, Deserialize)]
pub struct UpdateEndpointRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(url)]
    pub url: Option<String>,

    pub is_active: Option<bool>,

    #[validate(range(min = 0, max = 20))]
    pub max_retries: Option<i32>,
}

impl DeliveryEndpoint {
    /// Next-attempt delay for `attempt` (1-indexed), per §4.6's three
    /// strategies plus optional uniform jitter in [0.5, 1.5].
    pub fn backoff_delay(&self, attempt: u32, jitter_factor: f64) -> std::time::Duration {
        let base = self.base_delay_secs as f64;
        let max = self.max_delay_secs as f64;
        let raw = match self.backoff_strategy {
            BackoffStrategy::Exponential => base * 2f64.powi(attempt as i32 - 1),
            BackoffStrategy::Linear => base * attempt as f64,
            BackoffStrategy::Fixed => base,
        }
        .min(max);

        let factor = if self.jitter { jitter_factor } else { 1.0 };
        std::time::Duration::from_secs_f64((raw * factor).max(0.0))
    }
}
