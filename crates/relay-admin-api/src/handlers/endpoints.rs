//! `/webhooks` CRUD and `/webhooks/{id}/deliveries`, the only surface §6
//! asks this collaborator to expose.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use relay_domain::endpoint::{BackoffStrategy, CreateEndpointRequest, DeliverySemantics, UpdateEndpointRequest};
use relay_domain::{DeliveryEndpoint, DeliveryReceipt, FilterPredicate};
use serde::Deserialize;
use sqlx::types::Json as SqlxJson;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthIdentity;
use crate::handlers::ErrorResponse;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: e.to_string() }),
    )
}

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "webhook endpoint not found".into(),
        }),
    )
}

const ENDPOINT_COLUMNS: &str = "id, org_id, name, url, method, headers, secret, filter, semantics,
     backoff_strategy, base_delay_secs, max_delay_secs, max_retries, jitter,
     timeout_secs, is_active, health_status, consecutive_failures,
     last_successful_delivery_at, created_at, updated_at";

pub async fn create_endpoint(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<CreateEndpointRequest>,
) -> Result<(StatusCode, Json<DeliveryEndpoint>), ApiError> {
    payload.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("validation error: {e}"),
            }),
        )
    })?;

    let filter = payload.filter.unwrap_or(FilterPredicate {
        event_types: vec![],
        channels: vec![],
        condition: None,
    });

    let query = format!(
        "INSERT INTO delivery_endpoints
            (org_id, name, url, method, headers, secret, filter, semantics, backoff_strategy,
             base_delay_secs, max_delay_secs, max_retries, timeout_secs)
         VALUES ($1, $2, $3, $4, '{{}}', $5, $6, $7, $8, $9, $10, $11, $12)
         RETURNING {ENDPOINT_COLUMNS}"
    );

    let endpoint: DeliveryEndpoint = sqlx::query_as(&query)
        .bind(identity.org_id)
        .bind(&payload.name)
        .bind(&payload.url)
        .bind(payload.method.clone().unwrap_or_else(|| "POST".to_string()))
        .bind(&payload.secret)
        .bind(SqlxJson(filter))
        .bind(payload.semantics.unwrap_or(DeliverySemantics::AtLeastOnce))
        .bind(payload.backoff_strategy.unwrap_or(BackoffStrategy::Exponential))
        .bind(payload.base_delay_secs.unwrap_or(1))
        .bind(payload.max_delay_secs.unwrap_or(60))
        .bind(payload.max_retries.unwrap_or(5))
        .bind(payload.timeout_secs.unwrap_or(10))
        .fetch_one(&pool)
        .await
        .map_err(internal)?;

    Ok((StatusCode::CREATED, Json(endpoint)))
}

pub async fn list_endpoints(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<Vec<DeliveryEndpoint>>, ApiError> {
    let query = format!("SELECT {ENDPOINT_COLUMNS} FROM delivery_endpoints WHERE org_id = $1 ORDER BY created_at DESC");
    let endpoints: Vec<DeliveryEndpoint> = sqlx::query_as(&query)
        .bind(identity.org_id)
        .fetch_all(&pool)
        .await
        .map_err(internal)?;
    Ok(Json(endpoints))
}

pub async fn get_endpoint(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryEndpoint>, ApiError> {
    let query = format!("SELECT {ENDPOINT_COLUMNS} FROM delivery_endpoints WHERE id = $1 AND org_id = $2");
    let endpoint: DeliveryEndpoint = sqlx::query_as(&query)
        .bind(id)
        .bind(identity.org_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    Ok(Json(endpoint))
}

pub async fn update_endpoint(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEndpointRequest>,
) -> Result<Json<DeliveryEndpoint>, ApiError> {
    payload.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("validation error: {e}"),
            }),
        )
    })?;

    let existing = get_endpoint(State(pool.clone()), AuthIdentity(identity.clone()), Path(id)).await?.0;

    let query = format!(
        "UPDATE delivery_endpoints
         SET name = $1, url = $2, is_active = $3, max_retries = $4, updated_at = now()
         WHERE id = $5 AND org_id = $6
         RETURNING {ENDPOINT_COLUMNS}"
    );

    let endpoint: DeliveryEndpoint = sqlx::query_as(&query)
        .bind(payload.name.unwrap_or(existing.name))
        .bind(payload.url.unwrap_or(existing.url))
        .bind(payload.is_active.unwrap_or(existing.is_active))
        .bind(payload.max_retries.unwrap_or(existing.max_retries))
        .bind(id)
        .bind(identity.org_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    Ok(Json(endpoint))
}

pub async fn delete_endpoint(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let result = sqlx::query("DELETE FROM delivery_endpoints WHERE id = $1 AND org_id = $2")
        .bind(id)
        .bind(identity.org_id)
        .execute(&pool)
        .await
        .map_err(internal)?;

    if result.rows_affected() == 0 {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn regenerate_hmac_secret(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryEndpoint>, ApiError> {
    let secret = generate_hmac_secret();
    let query = format!(
        "UPDATE delivery_endpoints SET secret = $1, updated_at = now()
         WHERE id = $2 AND org_id = $3
         RETURNING {ENDPOINT_COLUMNS}"
    );
    let endpoint: DeliveryEndpoint = sqlx::query_as(&query)
        .bind(secret)
        .bind(id)
        .bind(identity.org_id)
        .fetch_optional(&pool)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    Ok(Json(endpoint))
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_deliveries(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
    Query(params): Query<DeliveriesQuery>,
) -> Result<Json<Vec<DeliveryReceipt>>, ApiError> {
    get_endpoint(State(pool.clone()), AuthIdentity(identity), Path(id)).await?;

    let limit = params.limit.clamp(1, 500);
    let receipts: Vec<DeliveryReceipt> = sqlx::query_as(
        "SELECT id, event_id, endpoint_id, status, attempts, first_attempt_at, last_attempt_at,
                response_code, response_time_ms, error, reconciled
         FROM delivery_receipts
         WHERE endpoint_id = $1
         ORDER BY last_attempt_at DESC
         LIMIT $2",
    )
    .bind(id)
    .bind(limit)
    .fetch_all(&pool)
    .await
    .map_err(internal)?;

    Ok(Json(receipts))
}

fn generate_hmac_secret() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const SECRET_LEN: usize = 64;

    let mut rng = rand::thread_rng();
    (0..SECRET_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_secret_is_64_chars_of_charset() {
        let secret = generate_hmac_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hmac_secret_is_not_constant() {
        assert_ne!(generate_hmac_secret(), generate_hmac_secret());
    }
}
