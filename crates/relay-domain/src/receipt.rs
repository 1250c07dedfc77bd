use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The durable outcome of delivering one event to one endpoint. Lives in
/// both persistent storage (for auditability) and the KV substrate (for
/// active retry state) while `status == Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DeliveryReceipt {
    pub id: Uuid,
    pub event_id: String,
    pub endpoint_id: Uuid,
    pub status: ReceiptStatus,
    pub attempts: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub response_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub error: Option<String>,
    pub reconciled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "VARCHAR", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Succeeded,
    Failed,
    Dead,
}

impl ReceiptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiptStatus::Succeeded | ReceiptStatus::Dead)
    }
}

impl DeliveryReceipt {
    pub fn new_pending(event_id: String, endpoint_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            endpoint_id,
            status: ReceiptStatus::Pending,
            attempts: 0,
            first_attempt_at: now,
            last_attempt_at: now,
            response_code: None,
            response_time_ms: None,
            error: None,
            reconciled: false,
        }
    }

    /// Advance the state machine of §4.6 given one attempt's outcome.
    pub fn record_attempt(
        &mut self,
        succeeded: bool,
        response_code: Option<i32>,
        response_time_ms: Option<i64>,
        error: Option<String>,
        max_retries: i32,
        at_most_once: bool,
        endpoint_active: bool,
    ) {
        self.attempts += 1;
        self.last_attempt_at = Utc::now();
        self.response_code = response_code;
        self.response_time_ms = response_time_ms;
        self.error = error;

        self.status = if succeeded {
            ReceiptStatus::Succeeded
        } else if !endpoint_active {
            ReceiptStatus::Dead
        } else if at_most_once {
            ReceiptStatus::Dead
        } else if self.attempts >= max_retries {
            ReceiptStatus::Dead
        } else {
            ReceiptStatus::Pending
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_terminal() {
        let mut receipt = DeliveryReceipt::new_pending("1-0".into(), Uuid::new_v4());
        receipt.record_attempt(true, Some(200), Some(50), None, 3, false, true);
        assert_eq!(receipt.status, ReceiptStatus::Succeeded);
        assert!(receipt.status.is_terminal());
    }

    #[test]
    fn at_most_once_terminalizes_on_first_failure() {
        let mut receipt = DeliveryReceipt::new_pending("1-0".into(), Uuid::new_v4());
        receipt.record_attempt(false, Some(500), Some(50), Some("boom".into()), 3, true, true);
        assert_eq!(receipt.status, ReceiptStatus::Dead);
    }

    #[test]
    fn at_least_once_reschedules_until_exhausted() {
        let mut receipt = DeliveryReceipt::new_pending("1-0".into(), Uuid::new_v4());
        receipt.record_attempt(false, Some(500), None, None, 3, false, true);
        assert_eq!(receipt.status, ReceiptStatus::Pending);
        receipt.record_attempt(false, Some(500), None, None, 3, false, true);
        assert_eq!(receipt.status, ReceiptStatus::Pending);
        receipt.record_attempt(false, Some(500), None, None, 3, false, true);
        assert_eq!(receipt.status, ReceiptStatus::Dead);
    }

    #[test]
    fn deactivated_endpoint_terminalizes() {
        let mut receipt = DeliveryReceipt::new_pending("1-0".into(), Uuid::new_v4());
        receipt.record_attempt(false, None, None, Some("connect refused".into()), 5, false, false);
        assert_eq!(receipt.status, ReceiptStatus::Dead);
    }
}
