//! Canonical webhook envelope and HMAC signing (§4.6, §6 "Signature format").
//!
//! The envelope's top-level shape (`event` then `delivery`, fields in the
//! order declared below) is fixed: every byte of it feeds into the HMAC, so
//! changing field order or names would be a wire-breaking change for every
//! receiver that re-derives the signature.

use chrono::{DateTime, Utc};
use relay_domain::Event;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope {
    pub event: EventEnvelope,
    pub delivery: DeliveryEnvelope,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub channel: String,
    pub payload: Value,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEnvelope {
    pub id: Uuid,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEnvelope {
    /// `delivery_id` identifies this event/endpoint delivery (stable across
    /// every retry attempt); it is the receipt's own id, not the endpoint's.
    pub fn new(event: &Event, delivery_id: Uuid, attempt: u32, now: DateTime<Utc>) -> Self {
        Self {
            event: EventEnvelope {
                id: event.id.clone(),
                event_type: event.event_type.clone(),
                channel: event.channel.clone(),
                payload: event.payload.clone(),
                organization_id: event.org_id,
                user_id: event.source_user_id.clone(),
                created_at: event.created_at,
                metadata: serde_json::json!({ "correlation_id": event.correlation_id }),
            },
            delivery: DeliveryEnvelope {
                id: delivery_id,
                attempt,
                timestamp: now,
            },
        }
    }

    /// The exact bytes sent as the request body. A compact `serde_json`
    /// struct serialization preserves field declaration order and emits no
    /// extraneous whitespace, so this is already the canonical form.
    pub fn canonical_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// `X-Webhook-Signature` header value: `sha256={hex_hmac_sha256(secret, body)}`.
pub fn sign_body(body: &str, secret: &str) -> String {
    format!("sha256={}", relay_common::auth::sign_hmac(body, secret))
}

pub fn verify_body(body: &str, header_value: &str, secret: &str) -> bool {
    let Some(hex) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    relay_common::auth::verify_hmac(body, hex, secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_event() -> Event {
        let mut event = Event::new(
            Uuid::nil(),
            "org:00000000-0000-0000-0000-000000000000:orders".into(),
            "order.created".into(),
            json!({"amount": 100}),
            "user-1".into(),
            None,
        );
        event.id = "1700000000000-0".into();
        event.created_at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        event
    }

    #[test]
    fn canonical_body_has_fixed_byte_layout() {
        let event = fixed_event();
        let delivery_id = Uuid::nil();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        let envelope = WebhookEnvelope::new(&event, delivery_id, 1, now);
        let body = envelope.canonical_body().unwrap();

        let expected = concat!(
            r#"{"event":{"id":"1700000000000-0","eventType":"order.created","#,
            r#""channel":"org:00000000-0000-0000-0000-000000000000:orders","#,
            r#""payload":{"amount":100},"organizationId":"00000000-0000-0000-0000-000000000000","#,
            r#""userId":"user-1","createdAt":"2026-01-01T00:00:00Z","#,
            r#""metadata":{"correlation_id":null}},"#,
            r#""delivery":{"id":"00000000-0000-0000-0000-000000000000","#,
            r#""attempt":1,"timestamp":"2026-01-01T00:00:01Z"}}"#,
        );
        assert_eq!(body, expected);
        assert!(!body.contains('\n'));
        assert!(!body.ends_with(' '));
    }

    #[test]
    fn signature_round_trips() {
        let body = r#"{"a":1}"#;
        let secret = "shh";
        let header = sign_body(body, secret);
        assert!(header.starts_with("sha256="));
        assert!(verify_body(body, &header, secret));
        assert!(!verify_body(r#"{"a":2}"#, &header, secret));
    }
}
