//! `/webhooks/templates*`, reading from relay-delivery's fixed template
//! table and, on instantiation, creating a regular delivery endpoint from it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use relay_delivery::templates;
use relay_domain::{DeliveryEndpoint, FilterPredicate};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlxJson;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::auth::AuthIdentity;
use crate::handlers::ErrorResponse;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub variables: Vec<TemplateVariableSummary>,
    pub example_payloads: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct TemplateVariableSummary {
    pub name: &'static str,
    pub required: bool,
    pub validation: Option<&'static str>,
    pub default: Option<&'static str>,
}

impl From<&templates::WebhookTemplate> for TemplateSummary {
    fn from(t: &templates::WebhookTemplate) -> Self {
        Self {
            id: t.id,
            name: t.name,
            description: t.description,
            variables: t
                .variables
                .iter()
                .map(|v| TemplateVariableSummary {
                    name: v.name,
                    required: v.required,
                    validation: v.validation,
                    default: v.default,
                })
                .collect(),
            example_payloads: t.example_payloads,
        }
    }
}

pub async fn list_templates() -> Json<Vec<TemplateSummary>> {
    Json(templates::list().iter().map(TemplateSummary::from).collect())
}

pub async fn get_template(Path(id): Path<String>) -> Result<Json<TemplateSummary>, ApiError> {
    templates::find(&id)
        .map(|t| Json(TemplateSummary::from(t)))
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("no such template: {id}"),
                }),
            )
        })
}

#[derive(Debug, Deserialize)]
pub struct FromTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

const ENDPOINT_COLUMNS: &str = "id, org_id, name, url, method, headers, secret, filter, semantics,
     backoff_strategy, base_delay_secs, max_delay_secs, max_retries, jitter,
     timeout_secs, is_active, health_status, consecutive_failures,
     last_successful_delivery_at, created_at, updated_at";

pub async fn from_template(
    State(pool): State<PgPool>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<String>,
    Json(payload): Json<FromTemplateRequest>,
) -> Result<(StatusCode, Json<DeliveryEndpoint>), ApiError> {
    let template = templates::find(&id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no such template: {id}"),
            }),
        )
    })?;

    let config = template.instantiate(&payload.values).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e.to_string() }),
        )
    })?;

    let url = config["url"].as_str().unwrap_or_default().to_string();
    let method = config["method"].as_str().unwrap_or("POST").to_string();
    let headers = config.get("headers").cloned().unwrap_or(serde_json::json!({}));

    let query = format!(
        "INSERT INTO delivery_endpoints (org_id, name, url, method, headers, filter)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {ENDPOINT_COLUMNS}"
    );

    let endpoint: DeliveryEndpoint = sqlx::query_as(&query)
        .bind(identity.org_id)
        .bind(&payload.name)
        .bind(&url)
        .bind(&method)
        .bind(SqlxJson(headers))
        .bind(SqlxJson(FilterPredicate {
            event_types: vec![],
            channels: vec![],
            condition: None,
        }))
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
        })?;

    Ok((StatusCode::CREATED, Json(endpoint)))
}
