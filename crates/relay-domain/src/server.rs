use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A gateway node's identity and current load, as written to its
/// `server:{id}` hash record in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub version: String,
    pub connection_count: u32,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Server {
    /// Score used by `get_best_server`: lower is better.
    pub fn load_score(&self) -> f64 {
        let connection_load = (self.connection_count as f64 / 10_000.0).min(1.0);
        0.5 * connection_load + 0.3 * self.cpu_percent + 0.2 * self.mem_percent
    }

    pub fn to_hash_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("protocol", self.protocol.clone()),
            ("version", self.version.clone()),
            ("connection_count", self.connection_count.to_string()),
            ("cpu_percent", self.cpu_percent.to_string()),
            ("mem_percent", self.mem_percent.to_string()),
            ("started_at", self.started_at.to_rfc3339()),
            ("last_heartbeat", self.last_heartbeat.to_rfc3339()),
        ]
    }

    pub fn from_hash_fields(
        id: Uuid,
        fields: &std::collections::HashMap<String, String>,
    ) -> Option<Self> {
        Some(Self {
            id,
            host: fields.get("host")?.clone(),
            port: fields.get("port")?.parse().ok()?,
            protocol: fields.get("protocol")?.clone(),
            version: fields.get("version")?.clone(),
            connection_count: fields.get("connection_count")?.parse().ok()?,
            cpu_percent: fields.get("cpu_percent")?.parse().ok()?,
            mem_percent: fields.get("mem_percent")?.parse().ok()?,
            started_at: fields.get("started_at")?.parse().ok()?,
            last_heartbeat: fields.get("last_heartbeat")?.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_score_weights_connections_cpu_mem() {
        let server = Server {
            id: Uuid::new_v4(),
            host: "10.0.0.1".into(),
            port: 8080,
            protocol: "ws".into(),
            version: "1.0.0".into(),
            connection_count: 5_000,
            cpu_percent: 0.4,
            mem_percent: 0.2,
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
        };
        // 0.5*0.5 + 0.3*0.4 + 0.2*0.2 = 0.25 + 0.12 + 0.04
        assert!((server.load_score() - 0.41).abs() < 1e-9);
    }
}
