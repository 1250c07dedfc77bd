//! Single webhook HTTP attempt: build the canonical envelope, sign it, POST
//! it, and classify the outcome. No status-code-specific retry gating lives
//! here — every non-2xx outcome is uniformly a failure; whether it gets
//! retried is decided entirely by `DeliveryReceipt::record_attempt` from the
//! endpoint's semantics, attempt count, and active flag (4xx is retried the
//! same as 5xx).

use chrono::Utc;
use relay_domain::{DeliveryEndpoint, Event};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::signature::{sign_body, WebhookEnvelope};

const MAX_RESPONSE_BODY_CHARS: usize = 10_000;

pub struct DeliveryOutcome {
    pub succeeded: bool,
    pub status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
}

pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn deliver(
        &self,
        endpoint: &DeliveryEndpoint,
        event: &Event,
        delivery_id: Uuid,
        attempt: u32,
    ) -> DeliveryOutcome {
        let envelope = WebhookEnvelope::new(event, delivery_id, attempt, Utc::now());
        let body = match envelope.canonical_body() {
            Ok(body) => body,
            Err(e) => {
                return DeliveryOutcome {
                    succeeded: false,
                    status_code: None,
                    response_body: None,
                    error_message: Some(format!("envelope serialization failed: {e}")),
                    duration_ms: 0,
                }
            }
        };

        let signature = endpoint
            .secret
            .as_deref()
            .map(|secret| sign_body(&body, secret))
            .unwrap_or_default();

        let timeout = Duration::from_secs(endpoint.timeout_secs.max(1) as u64);
        let started = Instant::now();

        let mut request = self
            .client
            .request(
                endpoint
                    .method
                    .parse()
                    .unwrap_or(reqwest::Method::POST),
                &endpoint.url,
            )
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Id", endpoint.id.to_string())
            .header("X-Webhook-Attempt", attempt.to_string())
            .body(body);

        if !signature.is_empty() {
            request = request.header("X-Webhook-Signature", signature);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let response_body = response
                    .text()
                    .await
                    .ok()
                    .map(|text| truncate(&text, MAX_RESPONSE_BODY_CHARS));
                DeliveryOutcome {
                    succeeded: status.is_success(),
                    status_code: Some(status.as_u16() as i32),
                    response_body,
                    error_message: if status.is_success() {
                        None
                    } else {
                        Some(format!("http status {status}"))
                    },
                    duration_ms: started.elapsed().as_millis() as i64,
                }
            }
            Err(e) => DeliveryOutcome {
                succeeded: false,
                status_code: None,
                response_body: None,
                error_message: Some(e.to_string()),
                duration_ms: started.elapsed().as_millis() as i64,
            },
        }
    }
}

impl Default for WebhookDelivery {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// The exactly-once bookkeeping key, shared by the worker and the
/// reconciliation sweep.
pub fn exactly_once_key(event_id: &str, endpoint_id: Uuid) -> String {
    format!("delivered:{}:{}", event_id, endpoint_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_caps_at_max_chars() {
        let long = "x".repeat(20_000);
        assert_eq!(truncate(&long, 10_000).len(), 10_000);
    }

    #[test]
    fn exactly_once_key_shape() {
        let id = Uuid::nil();
        assert_eq!(exactly_once_key("1-0", id), "delivered:1-0:00000000-0000-0000-0000-000000000000");
    }
}
