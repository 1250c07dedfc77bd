use crate::enforcement::{AuditSink, QuotaEnforcer, TenantRateLimiter};
use crate::router::{LocalSockets, Router};
use crate::session::ConnectionManager;
use relay_config::{AuthConfig, RateLimitConfig, TenantDefaultsConfig};
use relay_event_stream::EventStream;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub server_id: Uuid,
    pub connections: Arc<ConnectionManager>,
    pub router: Arc<Router>,
    pub event_stream: Arc<EventStream>,
    pub tenant_rate_limiter: Arc<TenantRateLimiter>,
    pub quota: Arc<QuotaEnforcer>,
    pub local_sockets: LocalSockets,
    pub audit_sink: AuditSink,
    pub auth_config: Arc<AuthConfig>,
    pub rate_limits: Arc<RateLimitConfig>,
    pub tenant_defaults: Arc<TenantDefaultsConfig>,
}
