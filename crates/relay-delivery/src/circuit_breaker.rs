//! Per-endpoint circuit breaker backing `DeliveryEndpoint.health_status`.
//! Closed/HalfOpen/Open map onto Healthy/Degraded/Failed.

use relay_domain::HealthStatus;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn to_health_status(self) -> HealthStatus {
        match self {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Failed,
        }
    }
}

struct EndpointHealth {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Tracks consecutive-failure counts per endpoint and trips a breaker once a
/// threshold is reached, giving a failing target a cooldown window before the
/// worker pool sends it traffic again.
pub struct CircuitBreakerManager {
    endpoints: Mutex<HashMap<Uuid, EndpointHealth>>,
    threshold: u32,
    timeout: Duration,
}

impl CircuitBreakerManager {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            threshold,
            timeout,
        }
    }

    /// Closed and HalfOpen allow the request through; Open allows it only
    /// once the cooldown has elapsed, at which point it flips to HalfOpen.
    pub fn should_allow_request(&self, endpoint_id: Uuid) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        let health = endpoints.entry(endpoint_id).or_default();
        match health.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = health.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.timeout {
                    health.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, endpoint_id: Uuid) {
        let mut endpoints = self.endpoints.lock().unwrap();
        let health = endpoints.entry(endpoint_id).or_default();
        health.consecutive_failures = 0;
        health.state = CircuitState::Closed;
        health.opened_at = None;
    }

    pub fn record_failure(&self, endpoint_id: Uuid) {
        let mut endpoints = self.endpoints.lock().unwrap();
        let health = endpoints.entry(endpoint_id).or_default();
        health.consecutive_failures += 1;

        match health.state {
            CircuitState::HalfOpen => {
                health.state = CircuitState::Open;
                health.opened_at = Some(Instant::now());
            }
            CircuitState::Closed if health.consecutive_failures >= self.threshold => {
                health.state = CircuitState::Open;
                health.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub fn get_state(&self, endpoint_id: Uuid) -> CircuitState {
        self.endpoints
            .lock()
            .unwrap()
            .get(&endpoint_id)
            .map(|h| h.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn health_status(&self, endpoint_id: Uuid) -> HealthStatus {
        self.get_state(endpoint_id).to_health_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreakerManager::new(3, Duration::from_secs(30));
        let id = Uuid::new_v4();
        assert!(breaker.should_allow_request(id));
        breaker.record_failure(id);
        breaker.record_failure(id);
        assert_eq!(breaker.get_state(id), CircuitState::Closed);
        breaker.record_failure(id);
        assert_eq!(breaker.get_state(id), CircuitState::Open);
        assert!(!breaker.should_allow_request(id));
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreakerManager::new(1, Duration::from_millis(0));
        let id = Uuid::new_v4();
        breaker.record_failure(id);
        assert_eq!(breaker.get_state(id), CircuitState::Open);
        assert!(breaker.should_allow_request(id));
        assert_eq!(breaker.get_state(id), CircuitState::HalfOpen);
        breaker.record_failure(id);
        assert_eq!(breaker.get_state(id), CircuitState::Open);
    }

    #[test]
    fn success_closes_and_resets() {
        let breaker = CircuitBreakerManager::new(2, Duration::from_secs(30));
        let id = Uuid::new_v4();
        breaker.record_failure(id);
        breaker.record_success(id);
        assert_eq!(breaker.get_state(id), CircuitState::Closed);
        assert_eq!(breaker.health_status(id), HealthStatus::Healthy);
    }
}
